//! Local observation store (SQLite).
//!
//! ## What this does
//! - `upsert` writes one [`Observation`] per tile key. Re-processing a tile
//!   replaces its counts; it never merges them.
//! - `rows_after` pages through rows in key order strictly after a cursor,
//!   which is what replication reads.
//!
//! Key-derived columns come from [`TileKey::parse`] in Rust, so both backends
//! store identical rows without triggers.

use diesel::SqliteConnection;
use diesel::prelude::*;
use thiserror::Error;
use tile_capture::models::{TileKey, TileKeyError};

use crate::classify::SeverityCounts;
use crate::models::Observation;
use crate::schema::traffic;
use crate::schema::traffic::dsl as t;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid tile key: {0}")]
    Key(#[from] TileKeyError),

    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),
}

/// Stateless handle; every call takes the connection explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }

    /// Insert or replace the observation for `key`.
    pub fn upsert(
        &self,
        conn: &mut SqliteConnection,
        key: &TileKey,
        counts: SeverityCounts,
    ) -> Result<Observation, StoreError> {
        let row = Observation::from_key(key, counts);
        diesel::insert_into(traffic::table)
            .values(&row)
            .on_conflict(t::tile_key)
            .do_update()
            .set(&row)
            .execute(conn)?;
        Ok(row)
    }

    /// [`Self::upsert`] for a raw key string, e.g. a tile file name.
    pub fn upsert_named(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        counts: SeverityCounts,
    ) -> Result<Observation, StoreError> {
        let key = TileKey::parse(key)?;
        self.upsert(conn, &key, counts)
    }

    /// Up to `limit` rows with `tile_key > cursor` (all rows when `cursor` is
    /// `None`), ascending by key.
    pub fn rows_after(
        &self,
        conn: &mut SqliteConnection,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Observation>, StoreError> {
        let mut query = t::traffic.select(Observation::as_select()).into_boxed();
        if let Some(cursor) = cursor {
            query = query.filter(t::tile_key.gt(cursor.to_string()));
        }
        let rows = query.order(t::tile_key.asc()).limit(limit).load(conn)?;
        Ok(rows)
    }

    pub fn get(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
    ) -> Result<Option<Observation>, StoreError> {
        let row = t::traffic
            .find(key)
            .select(Observation::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn count(&self, conn: &mut SqliteConnection) -> Result<i64, StoreError> {
        Ok(t::traffic.count().get_result(conn)?)
    }
}
