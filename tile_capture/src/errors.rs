use std::path::PathBuf;

use thiserror::Error;

use crate::providers::RenderError;

/// Why one tile of a batch was not captured. Never aborts the batch.
#[derive(Debug, Error)]
pub enum TileError {
    /// Renderer call failed.
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// Bytes arrived but could not be written to disk.
    #[error("failed to write tile {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The capture task panicked.
    #[error("capture task panicked: {0}")]
    Panicked(String),
}

/// Batch-level outcome that the caller has to act on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Cancellation was observed and no tile was captured.
    #[error("capture cancelled before any tile was captured")]
    Cancelled,

    /// Every dispatched capture failed.
    #[error("none of the {attempted} dispatched captures succeeded")]
    NothingCaptured { attempted: usize },
}
