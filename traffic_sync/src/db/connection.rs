//! Connection helpers for both stores.
//!
//! Example:
//! ```no_run
//! use traffic_sync::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("traffic_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap()).expect("open sqlite");
//! ```

use anyhow::Context;
use diesel::{Connection, PgConnection, RunQueryDsl, SqliteConnection, sql_query};

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)
        .with_context(|| format!("open sqlite database {database_url}"))?;

    // Readers (replication) and the writer (analysis) share the file.
    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    sql_query("PRAGMA busy_timeout=5000;").execute(&mut conn)?;
    Ok(conn)
}

/// Open a PostgreSQL connection. The URL carries credentials, so it is not echoed in errors.
pub fn connect_postgres(database_url: &str) -> anyhow::Result<PgConnection> {
    PgConnection::establish(database_url).context("connect to remote postgres")
}
