//! Orchestration: capture, analyze, compose, clean up, replicate.
//!
//! ## Periodic loop
//! ```text
//! tick -> cadence -> retention -> capture -> analyze -> delete tiles -> hint
//!                                                                        |
//!                                              Replicator (own task) <---+
//! ```
//! Classification, storage and composition run sequentially on the blocking
//! pool; only capture is concurrent. One cancellation token stops everything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use std::num::NonZeroU32;

use anyhow::Context;
use chrono::Utc;
use diesel::PgConnection;
use tile_capture::grid::GridPlanner;
use tile_capture::models::{BatchStamp, GridCell, TileKey};
use tile_capture::providers::TileRenderer;
use tile_capture::providers::http_render::{HttpRenderer, HttpRendererConfig};
use tile_capture::{BatchReport, CaptureScheduler, ScheduleError, SkipPolicy};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cadence::TickDecision;
use crate::classify::ColorClassifier;
use crate::config::{AppConfig, FoldersConfig};
use crate::db::connection::{connect_postgres, connect_sqlite};
use crate::db::migrate;
use crate::mosaic::{IsolateReport, MosaicComposer, list_png};
use crate::png;
use crate::replication::{HINT_CAPACITY, RemoteConnector, RemoteStore, Replicator, SyncOutcome};
use crate::retention::RetentionManager;
use crate::store::LocalStore;

/// Resolved working directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folders {
    pub screenshots: PathBuf,
    pub masks: PathBuf,
    pub db: PathBuf,
    pub mosaics: PathBuf,
    pub mask_mosaics: PathBuf,
    pub isolated: PathBuf,
    pub db_path: PathBuf,
}

impl Folders {
    pub fn from_config(cfg: &FoldersConfig) -> Self {
        let at = |p: &Path| cfg.root.join(p);
        let db = at(&cfg.db);
        Self {
            screenshots: at(&cfg.screenshots),
            masks: at(&cfg.masks),
            db_path: db.join(&cfg.db_file),
            db,
            mosaics: at(&cfg.mosaics),
            mask_mosaics: at(&cfg.mask_mosaics),
            isolated: at(&cfg.isolated),
        }
    }

    pub fn create_all(&self) -> anyhow::Result<()> {
        for dir in [
            &self.screenshots,
            &self.masks,
            &self.db,
            &self.mosaics,
            &self.mask_mosaics,
            &self.isolated,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create folder {}", dir.display()))?;
        }
        Ok(())
    }

    /// Diesel URL of the local store.
    pub fn db_url(&self) -> String {
        self.db_path.to_string_lossy().into_owned()
    }
}

/// Outcome of [`Pipeline::analyze_batch`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalyzeReport {
    pub analyzed: usize,
    pub failed: usize,
    /// Stamps whose mosaics were written.
    pub mosaics: Vec<String>,
}

/// All components wired from one [`AppConfig`].
#[derive(Clone)]
pub struct Pipeline {
    config: AppConfig,
    folders: Folders,
    planner: GridPlanner,
    classifier: ColorClassifier,
    composer: MosaicComposer,
    store: LocalStore,
}

impl Pipeline {
    /// Create folders and migrate the local store.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let folders = Folders::from_config(&config.folders);
        folders.create_all()?;
        migrate::run_sqlite(&folders.db_url()).context("migrate local store")?;

        let planner = config.grid.planner()?;
        let (rows, cols) = planner.dimensions();
        let composer = MosaicComposer::new(config.layout, rows, cols).with_labels(config.mosaic.labels);
        info!(rows, cols, db = %folders.db_path.display(), "pipeline ready");

        Ok(Self {
            classifier: config.classifier(),
            config,
            folders,
            planner,
            composer,
            store: LocalStore::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn folders(&self) -> &Folders {
        &self.folders
    }

    pub fn planner(&self) -> &GridPlanner {
        &self.planner
    }

    /// HTTP renderer from the environment, paced by `[render]`.
    pub fn http_renderer(&self) -> anyhow::Result<Arc<dyn TileRenderer>> {
        let mut cfg = HttpRendererConfig::from_env()?;
        cfg.requests_per_second = NonZeroU32::new(self.config.render.requests_per_second)
            .context("[render] requests_per_second must be >= 1")?;
        cfg.timeout = self.config.render.timeout();
        let renderer = HttpRenderer::new(cfg)?;
        info!(endpoint = %renderer.endpoint(), "renderer ready");
        Ok(Arc::new(renderer))
    }

    /// Replicator against the Postgres store named by `REMOTE_DATABASE_URL`.
    /// Remote migrations are applied once here.
    pub async fn remote_replicator(&self) -> anyhow::Result<Replicator<PgConnection>> {
        let url = AppConfig::remote_database_url()?;
        let migrate_url = url.clone();
        tokio::task::spawn_blocking(move || migrate::run_postgres(&migrate_url))
            .await?
            .context("migrate remote store")?;

        let connector: RemoteConnector<PgConnection> = Arc::new(move || connect_postgres(&url));
        Ok(Replicator::new(
            self.folders.db_url(),
            connector,
            self.config.sync.options(),
        ))
    }

    /// Drain the local store into the remote one, page by page.
    pub async fn sync_all<R>(
        &self,
        replicator: &Replicator<R>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<usize>
    where
        R: RemoteStore + Send + 'static,
    {
        let mut copied = 0;
        loop {
            let SyncOutcome {
                copied: n,
                rearm,
                interrupted,
                ..
            } = replicator.attempt(cancel).await?;
            copied += n;
            if !rearm || interrupted {
                break;
            }
        }
        info!(copied, "sync finished");
        Ok(copied)
    }

    /// Capture one batch under a fresh stamp.
    pub async fn capture_cycle(
        &self,
        renderer: Arc<dyn TileRenderer>,
        skip: &mut SkipPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ScheduleError> {
        let stamp = BatchStamp::now();
        info!(%stamp, "capturing batch");
        CaptureScheduler::new(
            renderer,
            self.config.render.template(),
            self.config.render.viewport(),
            &self.folders.screenshots,
        )
        .with_concurrency(self.config.capture.concurrency)
        .run(stamp, self.planner.cells(), skip, cancel)
        .await
    }

    /// [`Self::analyze_batch_blocking`] on the blocking pool.
    pub async fn analyze_batch(&self, prefix: &str) -> anyhow::Result<AnalyzeReport> {
        let this = self.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || this.analyze_batch_blocking(&prefix)).await?
    }

    /// Classify every tile whose name contains `prefix`, then compose the tile
    /// and mask mosaics of each batch seen.
    pub fn analyze_batch_blocking(&self, prefix: &str) -> anyhow::Result<AnalyzeReport> {
        let mut conn = connect_sqlite(&self.folders.db_url())?;
        let mut report = AnalyzeReport::default();
        let mut stamps: Vec<String> = Vec::new();

        // Ascending names keep the replication cursor monotonic.
        for path in self.batch_tiles(prefix)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = match TileKey::parse(name) {
                Ok(key) => key,
                Err(e) => {
                    debug!(file = name, error = %e, "skipping non-tile file");
                    continue;
                }
            };
            match self.analyze_tile(&mut conn, &path, &key) {
                Ok(()) => {
                    report.analyzed += 1;
                    let stamp = key.stamp.to_string();
                    if !stamps.contains(&stamp) {
                        stamps.push(stamp);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(file = name, error = %format!("{e:#}"), "tile analysis failed");
                }
            }
        }

        for stamp in stamps {
            match self.compose_batch(&stamp) {
                Ok(()) => report.mosaics.push(stamp),
                Err(e) => warn!(%stamp, error = %format!("{e:#}"), "mosaic composition failed"),
            }
        }

        info!(
            prefix,
            analyzed = report.analyzed,
            failed = report.failed,
            mosaics = report.mosaics.len(),
            "analysis finished"
        );
        Ok(report)
    }

    fn batch_tiles(&self, prefix: &str) -> anyhow::Result<Vec<PathBuf>> {
        let all = list_png(&self.folders.screenshots, "")?;
        Ok(all
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(prefix))
            })
            .collect())
    }

    fn analyze_tile(
        &self,
        conn: &mut diesel::SqliteConnection,
        path: &Path,
        key: &TileKey,
    ) -> anyhow::Result<()> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let classified = self.classifier.classify_bytes(&bytes)?;

        let mask_path = self.folders.masks.join(key.file_name());
        png::save_gray(&mask_path, &classified.mask)
            .with_context(|| format!("write mask {}", mask_path.display()))?;

        self.store.upsert(conn, key, classified.counts)?;
        debug!(key = %key, yellow = classified.counts.yellow, red = classified.counts.red,
            dark_red = classified.counts.dark_red, "tile analyzed");
        Ok(())
    }

    fn compose_batch(&self, stamp: &str) -> anyhow::Result<()> {
        let file = format!("{stamp}.png");

        let tiles = self.composer.compose_dir(&self.folders.screenshots, stamp)?;
        png::save_rgba(&self.folders.mosaics.join(&file), &tiles.image)?;
        drop(tiles);

        let masks = self.composer.compose_dir(&self.folders.masks, stamp)?;
        png::save_rgba(&self.folders.mask_mosaics.join(&file), &masks.image)?;
        info!(%stamp, placed = masks.placed.len(), "mosaics written");
        Ok(())
    }

    /// Remove a batch's tiles and masks once they are folded into mosaics.
    pub fn delete_batch_tiles(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut removed = 0;
        for path in self.batch_tiles(prefix)? {
            let Some(name) = path.file_name() else { continue };
            std::fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            let mask = self.folders.masks.join(name);
            match std::fs::remove_file(&mask) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %mask.display(), "no mask to remove");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("remove {}", mask.display()));
                }
            }
            removed += 1;
        }
        info!(prefix, removed, "batch tiles deleted");
        Ok(removed)
    }

    /// Extract `cell` from every stored tile mosaic into the isolate folder.
    pub async fn isolate(
        &self,
        cell: GridCell,
        cancel: &CancellationToken,
    ) -> anyhow::Result<IsolateReport> {
        let report = self
            .composer
            .isolate_all(
                &self.folders.mosaics,
                &self.folders.isolated,
                cell,
                self.config.mosaic.isolate_concurrency,
                cancel,
            )
            .await?;
        Ok(report)
    }

    fn retention(&self) -> RetentionManager {
        RetentionManager::new(
            self.folders.mosaics.clone(),
            self.folders.mask_mosaics.clone(),
            self.config.retention.min_free_bytes,
        )
    }

    /// Tick until cancelled. `replicator`, when given, runs alongside and is
    /// woken after every analyzed batch.
    pub async fn run_periodic<R>(
        &self,
        renderer: Arc<dyn TileRenderer>,
        replicator: Option<Replicator<R>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>
    where
        R: RemoteStore + Send + 'static,
    {
        let mut cadence = self.config.schedule.cadence()?;
        let mut skip = self.config.capture.skip_policy();
        let period = self.config.schedule.interval();
        let (hint_tx, hint_rx) = mpsc::channel(HINT_CAPACITY);
        let replication = replicator.map(|r| {
            tokio::spawn(r.run(hint_rx, hint_tx.downgrade(), cancel.clone()))
        });
        // Catch up on anything left from a previous run.
        let _ = hint_tx.try_send(());

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "periodic capture started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match cadence.decide(Utc::now()) {
                TickDecision::Capture => {}
                decision => {
                    debug!(?decision, "tick skipped");
                    continue;
                }
            }

            let retention = self.retention();
            match tokio::task::spawn_blocking(move || retention.prune_oldest()).await {
                Ok(Ok(outcome)) => debug!(?outcome, "retention check"),
                Ok(Err(e)) => warn!(error = %e, "retention failed, continuing"),
                Err(e) => warn!(error = %e, "retention task failed, continuing"),
            }

            let report = match self.capture_cycle(Arc::clone(&renderer), &mut skip, &cancel).await {
                Ok(report) => report,
                Err(ScheduleError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, "capture cycle failed");
                    continue;
                }
            };
            if report.cancelled {
                info!(stamp = %report.stamp, "capture interrupted, tiles kept for a later analyze");
                break;
            }

            let stamp = report.stamp.to_string();
            if let Err(e) = self.analyze_batch(&stamp).await {
                error!(%stamp, error = %format!("{e:#}"), "analysis failed");
                continue;
            }
            if let Err(e) = self.delete_batch_tiles(&stamp) {
                warn!(%stamp, error = %format!("{e:#}"), "failed to delete batch tiles");
                continue;
            }
            let _ = hint_tx.try_send(());
        }

        info!("periodic capture stopped");
        drop(hint_tx);
        if let Some(handle) = replication {
            match handle.await {
                Ok(attempts) => debug!(attempts, "replicator joined"),
                Err(e) => warn!(error = %e, "replicator task failed"),
            }
        }
        Ok(())
    }
}
