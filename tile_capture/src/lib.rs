//! Capture side of the traffic pipeline.
//!
//! - [`grid`] turns a bounding box into a raster of tile centers.
//! - [`skip`] thins out cells that rarely show traffic.
//! - [`scheduler`] renders and writes one batch of tiles with bounded concurrency.
//! - [`providers`] holds the renderer trait and its HTTP implementation.

pub mod errors;
pub mod grid;
pub mod models;
pub mod providers;
pub mod scheduler;
pub mod skip;

pub use errors::{ScheduleError, TileError};
pub use grid::{BoundaryPolicy, GridPlanner};
pub use scheduler::{BatchReport, CaptureScheduler};
pub use skip::SkipPolicy;
