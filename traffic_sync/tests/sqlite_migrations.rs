use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Text;
use traffic_sync::db::connection::connect_sqlite;
use traffic_sync::db::migrate;

mod common;

#[derive(QueryableByName)]
struct NameRow {
    #[diesel(sql_type = Text)]
    name: String,
}

#[test]
fn migrations_create_traffic_table_and_index() {
    let (_db, mut conn) = common::setup_db();

    let tables: Vec<NameRow> =
        sql_query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'traffic'")
            .load(&mut conn)
            .expect("query tables");
    assert_eq!(tables.len(), 1);

    let indexes: Vec<NameRow> = sql_query(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'traffic' \
         AND name NOT LIKE 'sqlite_autoindex%'",
    )
    .load(&mut conn)
    .expect("query indexes");
    assert!(!indexes.is_empty(), "expected a (x, y, observed_at) index");
}

#[test]
fn migrations_are_idempotent() {
    let (db, _conn) = common::setup_db();
    migrate::run_sqlite(&db.path).expect("second run");
    migrate::run_all(&db.path).expect("run_all on sqlite path");
}

#[test]
fn every_connection_applies_pragmas() {
    let (db, mut conn) = common::setup_db();
    common::assert_sqlite_pragmas(&mut conn);

    let mut second = connect_sqlite(&db.path).expect("connect second");
    common::assert_sqlite_pragmas(&mut second);
}
