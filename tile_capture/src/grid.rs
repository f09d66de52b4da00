//! Grid planning: turn a bounding box into a raster of tile centers.
//!
//! ## What this does
//! Starting half a footprint south-east of the north-west corner, walk east one
//! tile width at a time (converted to longitude at the current row's latitude),
//! wrap to the next row one tile height south, and stop once a row leaves the box.
//!
//! ## Boundary handling
//! [`BoundaryPolicy::PartialCover`] keeps every row/column whose tile still
//! overlaps the box, giving `ceil(extent / footprint)` cells per axis.
//! [`BoundaryPolicy::CenterInside`] keeps only tiles whose center lies inside.

use serde::{Deserialize, Serialize};

use crate::models::geo::{BoundingBox, LatLng, TileFootprint, METERS_PER_DEGREE};
use crate::models::{GridCell, PlannedCell};

// Absorbs float noise when the extent is an exact multiple of the footprint.
const EPS_M: f64 = 1e-6;

/// Which boundary tiles are part of the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Visit a tile while any of it overlaps the box.
    #[default]
    PartialCover,
    /// Visit a tile only while its center is inside the box.
    CenterInside,
}

/// Pure geometry over one box and footprint. Cheap to copy; every call to
/// [`GridPlanner::cells`] starts a fresh walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPlanner {
    bbox: BoundingBox,
    footprint: TileFootprint,
    policy: BoundaryPolicy,
}

impl GridPlanner {
    pub fn new(bbox: BoundingBox, footprint: TileFootprint, policy: BoundaryPolicy) -> Self {
        Self {
            bbox,
            footprint,
            policy,
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn footprint(&self) -> &TileFootprint {
        &self.footprint
    }

    /// Raster-order iterator over every planned cell.
    pub fn cells(&self) -> Cells {
        Cells {
            planner: *self,
            row: 0,
            col: 0,
        }
    }

    /// `(rows, cols)` of the raster; `cols` is the widest row.
    pub fn dimensions(&self) -> (u32, u32) {
        let mut rows = 0;
        let mut cols = 0;
        while self.row_included(rows) {
            let lat = self.row_lat(rows);
            let mut n = 0;
            while self.col_included(lat, n) {
                n += 1;
            }
            cols = cols.max(n);
            rows += 1;
        }
        (rows, cols)
    }

    fn row_lat(&self, row: u32) -> f64 {
        let offset = self.footprint.height_m * (f64::from(row) + 0.5);
        self.bbox.nw.lat - offset / METERS_PER_DEGREE
    }

    fn row_included(&self, row: u32) -> bool {
        let h = self.footprint.height_m;
        let start = h * f64::from(row);
        let extent = self.bbox.height_m();
        match self.policy {
            BoundaryPolicy::PartialCover => start < extent - EPS_M,
            BoundaryPolicy::CenterInside => start + h / 2.0 < extent,
        }
    }

    fn col_included(&self, lat: f64, col: u32) -> bool {
        let w = self.footprint.width_m;
        let start = w * f64::from(col);
        let extent = self.bbox.width_m_at(lat);
        match self.policy {
            BoundaryPolicy::PartialCover => start < extent - EPS_M,
            BoundaryPolicy::CenterInside => start + w / 2.0 < extent,
        }
    }
}

/// Iterator returned by [`GridPlanner::cells`].
#[derive(Debug, Clone)]
pub struct Cells {
    planner: GridPlanner,
    row: u32,
    col: u32,
}

impl Iterator for Cells {
    type Item = PlannedCell;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.planner.row_included(self.row) {
                return None;
            }
            let lat = self.planner.row_lat(self.row);
            if self.planner.col_included(lat, self.col) {
                let start = LatLng::new(lat, self.planner.bbox.nw.lng);
                let offset = self.planner.footprint.width_m * (f64::from(self.col) + 0.5);
                let cell = PlannedCell {
                    cell: GridCell::new(self.col, self.row),
                    center: start.east(offset),
                };
                self.col += 1;
                return Some(cell);
            }
            self.row += 1;
            self.col = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::models::geo::meters_per_degree_lng;

    fn deployed(policy: BoundaryPolicy) -> GridPlanner {
        GridPlanner::new(
            BoundingBox::new(LatLng::new(26.99, 75.65), LatLng::new(26.78, 75.92)).unwrap(),
            TileFootprint::new(1100.0, 1800.0).unwrap(),
            policy,
        )
    }

    #[test]
    fn center_inside_reproduces_the_deployed_grid() {
        let planner = deployed(BoundaryPolicy::CenterInside);
        assert_eq!(planner.dimensions(), (21, 15));
        assert_eq!(planner.cells().count(), 21 * 15);

        let last = planner.cells().last().unwrap();
        assert_eq!(last.cell, GridCell::new(14, 20));
    }

    #[test]
    fn first_center_is_half_a_footprint_from_the_corner() {
        let planner = deployed(BoundaryPolicy::PartialCover);
        let first = planner.cells().next().unwrap();
        assert_eq!(first.cell, GridCell::new(0, 0));

        let south_m = (26.99 - first.center.lat) * METERS_PER_DEGREE;
        let east_m = (first.center.lng - 75.65) * meters_per_degree_lng(first.center.lat);
        assert!((south_m - 550.0).abs() < 1e-6);
        assert!((east_m - 900.0).abs() < 1e-6);
    }

    #[test]
    fn walk_is_restartable_and_raster_ordered() {
        let planner = deployed(BoundaryPolicy::PartialCover);
        let a: Vec<_> = planner.cells().map(|c| c.cell).collect();
        let b: Vec<_> = planner.cells().map(|c| c.cell).collect();
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_by_key(|c| (c.y, c.x));
        assert_eq!(a, sorted);
    }

    #[test]
    fn exact_multiple_does_not_add_a_sliver_row() {
        // 2200 m tall box, 1100 m tiles.
        let nw = LatLng::new(0.0, 0.0);
        let se = LatLng::new(-2200.0 / METERS_PER_DEGREE, 0.05);
        let planner = GridPlanner::new(
            BoundingBox::new(nw, se).unwrap(),
            TileFootprint::new(1100.0, 1800.0).unwrap(),
            BoundaryPolicy::PartialCover,
        );
        assert_eq!(planner.dimensions().0, 2);
    }

    proptest! {
        #[test]
        fn partial_cover_counts_are_ceil_of_extent(
            lat in -60.0f64..60.0,
            lng in -170.0f64..170.0,
            dlat in 0.005f64..0.5,
            dlng in 0.005f64..0.5,
            h in 200.0f64..3000.0,
            w in 200.0f64..3000.0,
        ) {
            let bbox = BoundingBox::new(LatLng::new(lat, lng), LatLng::new(lat - dlat, lng + dlng)).unwrap();
            let planner = GridPlanner::new(bbox, TileFootprint::new(h, w).unwrap(), BoundaryPolicy::PartialCover);
            let cells: Vec<_> = planner.cells().collect();

            let rows = (bbox.height_m() / h).ceil() as u32;
            prop_assert_eq!(planner.dimensions().0, rows);

            for row in 0..rows {
                let in_row: Vec<_> = cells.iter().filter(|c| c.cell.y == row).collect();
                let expected = (bbox.width_m_at(in_row[0].center.lat) / w).ceil() as usize;
                prop_assert_eq!(in_row.len(), expected);
            }

            let unique: HashSet<_> = cells.iter().map(|c| c.cell).collect();
            prop_assert_eq!(unique.len(), cells.len());
        }
    }
}
