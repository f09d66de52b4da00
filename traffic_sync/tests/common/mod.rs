#![allow(dead_code)]

use std::path::{Path, PathBuf};

use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tile_capture::models::{BatchStamp, GridCell, TileKey};
use traffic_sync::classify::SeverityCounts;
use traffic_sync::db::{connection, migrate};
use traffic_sync::store::LocalStore;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("test.db").to_string_lossy().to_string();

    migrate::run_sqlite(&path).expect("migrations");
    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

/// Key for `cell` in the batch stamped `stamp` (`YYYYMMDD-HHMMSS`).
pub fn key(stamp: &str, x: u32, y: u32) -> TileKey {
    TileKey::new(stamp.parse::<BatchStamp>().expect("stamp"), GridCell { x, y })
}

/// Insert `n` rows for one batch, cells laid out along the first row.
pub fn seed(conn: &mut SqliteConnection, stamp: &str, n: u32) -> Vec<String> {
    let store = LocalStore::new();
    (0..n)
        .map(|x| {
            let counts = SeverityCounts {
                yellow: x,
                red: 2 * x,
                dark_red: 1,
            };
            store
                .upsert(conn, &key(stamp, x, 0), counts)
                .expect("seed row")
                .tile_key
        })
        .collect()
}

/// Grey tile with a `size` square of `fill` at `at`.
pub fn tile(width: u32, height: u32, fill: Rgb<u8>, at: (u32, u32), size: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([230, 230, 230]));
    for y in at.1..at.1 + size {
        for x in at.0..at.0 + size {
            img.put_pixel(x, y, fill);
        }
    }
    img
}

pub fn write_png(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    img.save(&path).expect("write png");
    path
}
