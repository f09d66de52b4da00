//! Tile keys: `YYYYMMDD-HHMMSS-xX-yY.png`.
//!
//! The key names the tile file on disk and is the primary key of the stored
//! observation. Parsing is a fixed-offset scan, no regex:
//!
//! ```text
//! 20240314-090507-x12-y3.png
//! |-- stamp ----| |x | |y|
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use thiserror::Error;

use super::batch::{BatchStamp, STAMP_LEN};
use super::cell::GridCell;

/// File extension of every tile and mosaic artifact.
pub const PNG_EXT: &str = ".png";

/// Reasons a string is not a tile key.
#[derive(Debug, Error, PartialEq)]
pub enum TileKeyError {
    /// Leading `YYYYMMDD-HHMMSS` block is missing or not a valid time.
    #[error("tile key {key:?} does not start with a YYYYMMDD-HHMMSS stamp")]
    Stamp {
        /// Offending key.
        key: String,
    },
    /// Coordinate block is not `-x<digits>-y<digits>`.
    #[error("tile key {key:?} has a malformed -xN-yN block")]
    Coordinates {
        /// Offending key.
        key: String,
    },
    /// Key does not end with `.png`.
    #[error("tile key {key:?} does not end with .png")]
    Extension {
        /// Offending key.
        key: String,
    },
}

/// Identity of one captured tile: batch stamp plus grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Batch the tile belongs to.
    pub stamp: BatchStamp,
    /// Raster position.
    pub cell: GridCell,
}

impl TileKey {
    pub fn new(stamp: BatchStamp, cell: GridCell) -> Self {
        Self { stamp, cell }
    }

    /// Parse a key (file name without directory).
    pub fn parse(key: &str) -> Result<Self, TileKeyError> {
        let stamp_part = key.get(..STAMP_LEN).ok_or_else(|| TileKeyError::Stamp {
            key: key.to_string(),
        })?;
        let stamp = stamp_part
            .parse::<BatchStamp>()
            .map_err(|_| TileKeyError::Stamp { key: key.to_string() })?;

        let rest = &key[STAMP_LEN..];
        let rest = rest.strip_suffix(PNG_EXT).ok_or_else(|| TileKeyError::Extension {
            key: key.to_string(),
        })?;

        let coords_err = || TileKeyError::Coordinates { key: key.to_string() };
        let rest = rest.strip_prefix("-x").ok_or_else(coords_err)?;
        let (x, y) = rest.split_once("-y").ok_or_else(coords_err)?;
        let x = parse_index(x).ok_or_else(coords_err)?;
        let y = parse_index(y).ok_or_else(coords_err)?;

        Ok(Self::new(stamp, GridCell::new(x, y)))
    }

    /// Tile file name, also the stored key.
    pub fn file_name(&self) -> String {
        self.to_string()
    }

    /// Capture time encoded in the key.
    pub fn observed_at(&self) -> NaiveDateTime {
        self.stamp.naive_utc()
    }
}

// Digits only: `u32::from_str` would also accept a leading '+'.
fn parse_index(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-x{}-y{}{}", self.stamp, self.cell.x, self.cell.y, PNG_EXT)
    }
}

impl FromStr for TileKey {
    type Err = TileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
