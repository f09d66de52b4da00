pub mod batch;
pub mod cell;
pub mod geo;
pub mod key;
pub mod request;

pub use batch::BatchStamp;
pub use cell::{GridCell, PlannedCell};
pub use geo::{BoundingBox, LatLng, TileFootprint};
pub use key::{TileKey, TileKeyError};
pub use request::{RenderRequest, UrlTemplate, Viewport};
