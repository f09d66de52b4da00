//! Geographic primitives: points, bounding boxes and tile footprints.
//!
//! Latitude grows northward and longitude grows eastward, so a bounding box is
//! described by its north-west and south-east corners:
//!
//! ```text
//!   nw.lat ------------------+
//!     |                      |
//!     |   latitude  (y, rows)|
//!     |                      |
//!     +------------------ se.lat
//!   nw.lng  longitude (x, cols)  se.lng
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Meters covered by one degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lng: f64,
}

impl LatLng {
    /// Create a point.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Move `meters` south.
    pub fn south(self, meters: f64) -> Self {
        Self {
            lat: self.lat - meters / METERS_PER_DEGREE,
            lng: self.lng,
        }
    }

    /// Move `meters` east, correcting for meridian convergence at this latitude.
    pub fn east(self, meters: f64) -> Self {
        Self {
            lat: self.lat,
            lng: self.lng + meters / meters_per_degree_lng(self.lat),
        }
    }
}

/// Meters per degree of longitude at `lat`.
pub fn meters_per_degree_lng(lat: f64) -> f64 {
    METERS_PER_DEGREE * lat.to_radians().cos()
}

/// Errors raised when a box or footprint is degenerate.
#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    /// North-west corner is not strictly north-west of the south-east corner.
    #[error("bounding box corners are inverted or empty: nw={nw:?} se={se:?}")]
    InvertedBox {
        /// North-west corner as given.
        nw: LatLng,
        /// South-east corner as given.
        se: LatLng,
    },
    /// Footprint dimensions must be finite and positive.
    #[error("tile footprint must be positive, got {height_m}m x {width_m}m")]
    EmptyFootprint {
        /// Height in meters.
        height_m: f64,
        /// Width in meters.
        width_m: f64,
    },
}

/// Rectangle on the map bounded by its north-west and south-east corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// North-west corner.
    pub nw: LatLng,
    /// South-east corner.
    pub se: LatLng,
}

impl BoundingBox {
    /// Build a box, rejecting inverted or zero-area corners.
    pub fn new(nw: LatLng, se: LatLng) -> Result<Self, GeoError> {
        if !(nw.lat > se.lat && se.lng > nw.lng) {
            return Err(GeoError::InvertedBox { nw, se });
        }
        Ok(Self { nw, se })
    }

    /// North-south extent in meters.
    pub fn height_m(&self) -> f64 {
        (self.nw.lat - self.se.lat) * METERS_PER_DEGREE
    }

    /// East-west extent in meters measured at latitude `lat`.
    pub fn width_m_at(&self, lat: f64) -> f64 {
        (self.se.lng - self.nw.lng) * meters_per_degree_lng(lat)
    }
}

/// Ground area covered by one captured tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileFootprint {
    /// North-south size in meters.
    pub height_m: f64,
    /// East-west size in meters.
    pub width_m: f64,
}

impl TileFootprint {
    /// Build a footprint, rejecting non-positive sizes.
    pub fn new(height_m: f64, width_m: f64) -> Result<Self, GeoError> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if !(ok(height_m) && ok(width_m)) {
            return Err(GeoError::EmptyFootprint { height_m, width_m });
        }
        Ok(Self { height_m, width_m })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn east_is_wider_in_degrees_away_from_equator() {
        let at_equator = LatLng::new(0.0, 10.0).east(1000.0);
        let at_27 = LatLng::new(27.0, 10.0).east(1000.0);
        assert!(at_27.lng - 10.0 > at_equator.lng - 10.0);
        assert!((at_equator.lng - 10.0 - 1000.0 / METERS_PER_DEGREE).abs() < 1e-12);
    }

    #[test]
    fn rejects_inverted_box_and_empty_footprint() {
        let nw = LatLng::new(26.78, 75.65);
        let se = LatLng::new(26.99, 75.92);
        assert!(matches!(BoundingBox::new(nw, se), Err(GeoError::InvertedBox { .. })));
        assert!(TileFootprint::new(0.0, 10.0).is_err());
        assert!(TileFootprint::new(f64::NAN, 10.0).is_err());
    }
}
