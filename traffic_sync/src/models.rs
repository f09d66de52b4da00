//! Diesel models mapping to the database schema.
//!
//! [`Observation`] mirrors [`crate::schema::traffic`] and is shared by the local
//! SQLite store and the remote PostgreSQL store, so one struct serves both
//! backends for Queryable/Insertable.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use tile_capture::models::TileKey;

use crate::classify::SeverityCounts;
use crate::schema::traffic;

/// A row in [`crate::schema::traffic`]: severity pixel counts for one tile.
///
/// `observed_at`, `x` and `y` are derived from `tile_key` at write time
/// (see [`Observation::from_key`]); they are never set independently.
#[derive(
    Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, AsChangeset, Identifiable,
)]
#[diesel(
    table_name = traffic,
    primary_key(tile_key),
    check_for_backend(diesel::sqlite::Sqlite, diesel::pg::Pg)
)]
pub struct Observation {
    /// `YYYYMMDD-HHMMSS-xX-yY.png`.
    pub tile_key: String,
    /// Pixels classified moderate.
    pub yellow: i32,
    /// Pixels classified heavy.
    pub red: i32,
    /// Pixels classified severe.
    pub dark_red: i32,
    /// Capture time (UTC) from the key's stamp.
    pub observed_at: NaiveDateTime,
    /// Column from the key.
    pub x: i32,
    /// Row from the key.
    pub y: i32,
}

impl Observation {
    /// Build the row for `key`, deriving the key-encoded columns.
    pub fn from_key(key: &TileKey, counts: SeverityCounts) -> Self {
        Self {
            tile_key: key.file_name(),
            yellow: saturating_i32(counts.yellow),
            red: saturating_i32(counts.red),
            dark_red: saturating_i32(counts.dark_red),
            observed_at: key.observed_at(),
            x: saturating_i32(key.cell.x),
            y: saturating_i32(key.cell.y),
        }
    }

    pub fn counts(&self) -> SeverityCounts {
        SeverityCounts {
            yellow: self.yellow.max(0) as u32,
            red: self.red.max(0) as u32,
            dark_red: self.dark_red.max(0) as u32,
        }
    }
}

fn saturating_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
