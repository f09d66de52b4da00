//! Grid cells: raster coordinates of one tile within the capture grid.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::geo::LatLng;

/// Column/row position of one tile. `x` counts columns west to east, `y` rows
/// north to south, both starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    /// Column index.
    pub x: u32,
    /// Row index.
    pub y: u32,
}

impl GridCell {
    /// Create a cell.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A cell together with the map coordinate its tile is centered on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedCell {
    /// Raster position.
    pub cell: GridCell,
    /// Tile center.
    pub center: LatLng,
}
