use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tile_capture::models::{BatchStamp, GridCell, LatLng, PlannedCell, RenderRequest, TileKey, UrlTemplate, Viewport};
use tile_capture::providers::{InternalSnafu, RenderError, TileRenderer};
use tile_capture::{CaptureScheduler, ScheduleError, SkipPolicy, TileError};
use tokio_util::sync::CancellationToken;

const PNG_STUB: &[u8] = b"\x89PNG\r\n\x1a\nstub";

fn stamp() -> BatchStamp {
    BatchStamp::from_utc(Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap())
}

fn row_of_cells(n: u32) -> Vec<PlannedCell> {
    (0..n)
        .map(|x| PlannedCell {
            cell: GridCell::new(x, 0),
            center: LatLng::new(26.98, 75.66 + f64::from(x) * 0.01),
        })
        .collect()
}

fn scheduler(renderer: Arc<dyn TileRenderer>, dir: &TempDir, n: usize) -> CaptureScheduler {
    CaptureScheduler::new(
        renderer,
        UrlTemplate::new("https://maps.example/@{lat},{lng},15z"),
        Viewport::default(),
        dir.path(),
    )
    .with_concurrency(n)
}

/// Tracks how many renders overlap.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TileRenderer for Gauge {
    async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(PNG_STUB.to_vec())
    }
}

/// Second call panics, third call fails, the rest succeed.
#[derive(Default)]
struct Flaky {
    calls: AtomicUsize,
}

#[async_trait]
impl TileRenderer for Flaky {
    async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            1 => panic!("renderer blew up"),
            2 => InternalSnafu { message: "tab crashed" }.fail(),
            _ => Ok(PNG_STUB.to_vec()),
        }
    }
}

struct AlwaysFails;

#[async_trait]
impl TileRenderer for AlwaysFails {
    async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        InternalSnafu { message: "offline" }.fail()
    }
}

/// Fires the shared token on its first call.
struct CancelOnFirst(CancellationToken);

#[async_trait]
impl TileRenderer for CancelOnFirst {
    async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        self.0.cancel();
        Ok(PNG_STUB.to_vec())
    }
}

#[tokio::test]
async fn concurrency_never_exceeds_the_limit() {
    let dir = TempDir::new().unwrap();
    let gauge = Arc::new(Gauge::default());
    let sched = scheduler(gauge.clone(), &dir, 4);

    let report = sched
        .run(stamp(), row_of_cells(24), &mut SkipPolicy::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.captured.len(), 24);
    assert!(report.failures.is_empty());
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {peak}");
    assert!(peak >= 2, "tasks never overlapped");

    let first = TileKey::new(stamp(), GridCell::new(0, 0));
    let on_disk = std::fs::read(dir.path().join("20240314-093000-x0-y0.png")).unwrap();
    assert_eq!(first.file_name(), "20240314-093000-x0-y0.png");
    assert_eq!(on_disk, PNG_STUB);
}

#[tokio::test]
async fn panics_and_failures_stay_inside_their_tile() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler(Arc::new(Flaky::default()), &dir, 3);

    let report = sched
        .run(stamp(), row_of_cells(6), &mut SkipPolicy::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.captured.len(), 4);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().any(|(_, e)| matches!(e, TileError::Panicked(m) if m.contains("blew up"))));
    assert!(report.failures.iter().any(|(_, e)| matches!(e, TileError::Render(_))));

    let pngs = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "png"))
        .count();
    assert_eq!(pngs, 4);
}

#[tokio::test]
async fn cancelled_before_dispatch_is_an_error() {
    let dir = TempDir::new().unwrap();
    let gauge = Arc::new(Gauge::default());
    let sched = scheduler(gauge.clone(), &dir, 2);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = sched
        .run(stamp(), row_of_cells(5), &mut SkipPolicy::none(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, ScheduleError::Cancelled);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn cancellation_mid_batch_keeps_finished_tiles() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let sched = scheduler(Arc::new(CancelOnFirst(cancel.clone())), &dir, 1);

    let report = sched
        .run(stamp(), row_of_cells(5), &mut SkipPolicy::none(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.captured.len(), 1);
    assert_eq!(report.captured[0].cell, GridCell::new(0, 0));
}

#[tokio::test]
async fn all_failures_mean_nothing_captured() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler(Arc::new(AlwaysFails), &dir, 2);

    let err = sched
        .run(stamp(), row_of_cells(3), &mut SkipPolicy::none(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, ScheduleError::NothingCaptured { attempted: 3 });
}

#[tokio::test]
async fn skipped_cells_produce_no_task_and_no_file() {
    let dir = TempDir::new().unwrap();
    let gauge = Arc::new(Gauge::default());
    let sched = scheduler(gauge, &dir, 2);
    let mut skip = SkipPolicy::new([(GridCell::new(1, 0), 3)]);

    let report = sched
        .run(stamp(), row_of_cells(3), &mut skip, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![GridCell::new(1, 0)]);
    assert_eq!(report.captured.len(), 2);
    assert!(!dir.path().join("20240314-093000-x1-y0.png").exists());
}

#[tokio::test]
async fn fully_skipped_batch_is_an_empty_success() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler(Arc::new(AlwaysFails), &dir, 2);
    let mut skip = SkipPolicy::new([(GridCell::new(0, 0), 5), (GridCell::new(1, 0), 5)]);

    let report = sched
        .run(stamp(), row_of_cells(2), &mut skip, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.captured.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(!report.cancelled);
}

/// Fails every call and fires the shared token on the first one.
struct FailAndCancel(CancellationToken);

#[async_trait]
impl TileRenderer for FailAndCancel {
    async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        self.0.cancel();
        InternalSnafu { message: "shutting down" }.fail()
    }
}

#[tokio::test]
async fn cancelled_batch_with_only_failures_reports_cancellation() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let sched = scheduler(Arc::new(FailAndCancel(cancel.clone())), &dir, 1);

    let err = sched
        .run(stamp(), row_of_cells(4), &mut SkipPolicy::none(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, ScheduleError::Cancelled);
}

#[tokio::test]
async fn cells_left_behind_by_cancellation_keep_their_skip_counters() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let sched = scheduler(Arc::new(CancelOnFirst(cancel.clone())), &dir, 1);
    // Cell (1, 0) is due for capture on its next attempt.
    let pending = GridCell::new(1, 0);
    let mut skip = SkipPolicy::with_phase([(pending, 3, 2)]);

    let report = sched
        .run(stamp(), row_of_cells(3), &mut skip, &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.skipped.is_empty());
    assert_eq!(report.captured.len(), 1);
    assert!(!skip.record_attempt(pending), "counter moved for an undispatched cell");
}
