//! Bounded-concurrency capture of one batch.
//!
//! ## What this does
//! For each planned cell (in raster order) the scheduler waits for one of `N`
//! permits, consults the [`SkipPolicy`] and spawns a task that renders
//! the tile and writes `<out_dir>/<stamp>-x<col>-y<row>.png`. Every task is its
//! own error boundary: render errors, write errors and panics become a
//! [`TileError`] for that tile only.
//!
//! ## Cancellation
//! The token is checked before each dispatch and raced against the permit wait.
//! Once it fires nothing new starts; tasks already running are awaited.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ScheduleError, TileError};
use crate::models::{BatchStamp, GridCell, PlannedCell, RenderRequest, TileKey, UrlTemplate, Viewport};
use crate::providers::TileRenderer;
use crate::skip::SkipPolicy;

/// Tasks in flight when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// What happened to one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub stamp: BatchStamp,
    /// Keys written, in completion order.
    pub captured: Vec<TileKey>,
    pub skipped: Vec<GridCell>,
    pub failures: Vec<(GridCell, TileError)>,
    /// Dispatch stopped early because the token fired.
    pub cancelled: bool,
}

impl BatchReport {
    fn new(stamp: BatchStamp) -> Self {
        Self {
            stamp,
            captured: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Cells that were actually handed to a capture task.
    pub fn attempted(&self) -> usize {
        self.captured.len() + self.failures.len()
    }
}

pub struct CaptureScheduler {
    renderer: Arc<dyn TileRenderer>,
    template: UrlTemplate,
    viewport: Viewport,
    out_dir: PathBuf,
    concurrency: usize,
}

impl CaptureScheduler {
    pub fn new(
        renderer: Arc<dyn TileRenderer>,
        template: UrlTemplate,
        viewport: Viewport,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            renderer,
            template,
            viewport,
            out_dir: out_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Cap on simultaneous captures; values below one are treated as one.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Capture every non-skipped cell of `cells` under `stamp`.
    pub async fn run<I>(
        &self,
        stamp: BatchStamp,
        cells: I,
        skip: &mut SkipPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ScheduleError>
    where
        I: IntoIterator<Item = PlannedCell>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;
        let mut report = BatchReport::new(stamp);

        for planned in cells {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    // Only happens if the semaphore is closed, which we never do.
                    Err(_) => break,
                },
            };
            // Counters only advance for cells reached before cancellation.
            if skip.record_attempt(planned.cell) {
                debug!(cell = %planned.cell, "skipping low-frequency cell");
                report.skipped.push(planned.cell);
                drop(permit);
                continue;
            }

            let key = TileKey::new(stamp, planned.cell);
            let request = RenderRequest {
                url: self.template.expand(planned.center),
                viewport: self.viewport,
            };
            let renderer = Arc::clone(&self.renderer);
            let path = self.out_dir.join(key.file_name());

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(capture_tile(renderer, request, path))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(TileError::Panicked(panic_message(panic))));
                (key, outcome)
            });
            dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let (key, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "capture task did not complete");
                    continue;
                }
            };
            match outcome {
                Ok(()) => report.captured.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "tile capture failed");
                    report.failures.push((key.cell, e));
                }
            }
        }

        info!(
            stamp = %stamp,
            captured = report.captured.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "capture batch finished"
        );

        if report.captured.is_empty() && (report.cancelled || cancel.is_cancelled()) {
            return Err(ScheduleError::Cancelled);
        }
        if dispatched > 0 && report.captured.is_empty() {
            return Err(ScheduleError::NothingCaptured {
                attempted: dispatched,
            });
        }
        Ok(report)
    }
}

async fn capture_tile(
    renderer: Arc<dyn TileRenderer>,
    request: RenderRequest,
    path: PathBuf,
) -> Result<(), TileError> {
    let bytes = renderer.render(&request).await?;

    // Write beside the target and rename, so readers never see half a PNG.
    let partial = path.with_extension("png.part");
    let written: std::io::Result<()> = async {
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await
    }
    .await;
    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(TileError::Write { path, source });
    }
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
