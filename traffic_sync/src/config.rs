//! Application configuration: TOML file plus environment for secrets.
//!
//! Every section has defaults matching the deployed setup, so an empty file is
//! a valid configuration. Unknown keys are rejected.
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Parse + validate from a file path: [`load_config_path`]
//!
//! Environment:
//! - `REMOTE_DATABASE_URL`: PostgreSQL URL of the remote store.
//! - `RENDER_SERVICE_URL` / `RENDER_SERVICE_TOKEN`: see
//!   [`tile_capture::providers::http_render`].

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use shared_utils::env::get_env_var;
use tile_capture::grid::{BoundaryPolicy, GridPlanner};
use tile_capture::models::{BoundingBox, LatLng, TileFootprint, UrlTemplate, Viewport};
use tile_capture::skip::{SkipPolicy, SkipRule};

use crate::cadence::{CadencePolicy, LocalWindow};
use crate::classify::{ColorClassifier, DEFAULT_THRESHOLD, Palette};
use crate::layout::TileLayout;
use crate::mosaic::DEFAULT_ISOLATE_CONCURRENCY;
use crate::replication::SyncOptions;
use crate::retention::DEFAULT_MIN_FREE_BYTES;

/// PostgreSQL URL of the remote store.
pub const REMOTE_DATABASE_URL: &str = "REMOTE_DATABASE_URL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub folders: FoldersConfig,
    pub grid: GridConfig,
    pub render: RenderConfig,
    pub capture: CaptureConfig,
    pub layout: TileLayout,
    pub classifier: ClassifierConfig,
    pub mosaic: MosaicConfig,
    pub retention: RetentionConfig,
    pub sync: SyncConfig,
    pub schedule: ScheduleConfig,
}

/// Working directories. Relative paths resolve against `root`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FoldersConfig {
    pub root: PathBuf,
    /// Raw tiles of the current batch.
    pub screenshots: PathBuf,
    /// Severity masks of the current batch.
    pub masks: PathBuf,
    pub db: PathBuf,
    /// Tile mosaics, one per batch.
    pub mosaics: PathBuf,
    /// Mask mosaics, one per batch.
    pub mask_mosaics: PathBuf,
    /// Output of `isolate`.
    pub isolated: PathBuf,
    /// SQLite file name inside `db`.
    pub db_file: String,
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            screenshots: PathBuf::from("ss"),
            masks: PathBuf::from("mask"),
            db: PathBuf::from("db"),
            mosaics: PathBuf::from("ss-comb"),
            mask_mosaics: PathBuf::from("mask-comb"),
            isolated: PathBuf::from("ss-iso"),
            db_file: "traffic.db".to_string(),
        }
    }
}

/// Bounding box and tile footprint.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    pub nw_lat: f64,
    pub nw_lng: f64,
    pub se_lat: f64,
    pub se_lng: f64,
    pub tile_height_m: f64,
    pub tile_width_m: f64,
    pub boundary: BoundaryPolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nw_lat: 26.99,
            nw_lng: 75.65,
            se_lat: 26.78,
            se_lng: 75.92,
            tile_height_m: 1100.0,
            tile_width_m: 1800.0,
            boundary: BoundaryPolicy::CenterInside,
        }
    }
}

impl GridConfig {
    pub fn planner(&self) -> anyhow::Result<GridPlanner> {
        let bbox = BoundingBox::new(
            LatLng::new(self.nw_lat, self.nw_lng),
            LatLng::new(self.se_lat, self.se_lng),
        )?;
        let footprint = TileFootprint::new(self.tile_height_m, self.tile_width_m)?;
        Ok(GridPlanner::new(bbox, footprint, self.boundary))
    }
}

/// Renderer settings. The service URL itself comes from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Map URL with `{lat}` and `{lng}` placeholders.
    pub url_template: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            url_template: "https://www.google.com/maps/@{lat},{lng},16z/data=!5m1!1e1".to_string(),
            viewport_width: viewport.width,
            viewport_height: viewport.height,
            requests_per_second: 5,
            timeout_secs: 60,
        }
    }
}

impl RenderConfig {
    pub fn template(&self) -> UrlTemplate {
        UrlTemplate::new(self.url_template.clone())
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Captures in flight at once.
    pub concurrency: usize,
    /// Low-frequency cells, see [`SkipPolicy`].
    pub skip: Vec<SkipRule>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            concurrency: tile_capture::scheduler::DEFAULT_CONCURRENCY,
            skip: Vec::new(),
        }
    }
}

impl CaptureConfig {
    pub fn skip_policy(&self) -> SkipPolicy {
        SkipPolicy::from_rules(&self.skip)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Per-channel tolerance.
    pub threshold: u8,
    pub palette: Palette,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            palette: Palette::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MosaicConfig {
    /// Print `"row, col"` on each tile of the mosaic.
    pub labels: bool,
    /// Mosaics decoded at once by `isolate`.
    pub isolate_concurrency: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            labels: true,
            isolate_concurrency: DEFAULT_ISOLATE_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Delete the oldest mosaic when free space is at or below this.
    pub min_free_bytes: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub page_size: usize,
    pub commit_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let opts = SyncOptions::default();
        Self {
            page_size: opts.page_size,
            commit_batch: opts.commit_batch,
        }
    }
}

impl SyncConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size,
            commit_batch: self.commit_batch,
        }
    }
}

/// Local-time window as two `HH:MM` strings. `start == end` is an empty window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    /// IANA zone the windows are expressed in.
    pub timezone: String,
    pub quiet: Option<WindowConfig>,
    pub throttle: Option<WindowConfig>,
    /// Inside `throttle`, capture every n-th tick.
    pub throttle_every: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            timezone: "Asia/Kolkata".to_string(),
            quiet: Some(WindowConfig {
                start: "02:30".into(),
                end: "07:30".into(),
            }),
            throttle: Some(WindowConfig {
                start: "23:30".into(),
                end: "01:30".into(),
            }),
            throttle_every: 3,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cadence(&self) -> anyhow::Result<CadencePolicy> {
        let tz = CadencePolicy::parse_tz(&self.timezone)?;
        let mut policy = CadencePolicy::always(tz);
        if let Some(w) = &self.quiet {
            policy = policy.with_quiet(LocalWindow::parse(&w.start, &w.end)?);
        }
        if let Some(w) = &self.throttle {
            policy = policy.with_throttle(LocalWindow::parse(&w.start, &w.end)?, self.throttle_every)?;
        }
        Ok(policy)
    }
}

impl AppConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        let planner = self.grid.planner().context("invalid [grid]")?;
        let (rows, cols) = planner.dimensions();
        if rows == 0 || cols == 0 {
            bail!("[grid] produces an empty raster");
        }
        if !self.render.template().is_complete() {
            bail!("[render] url_template must contain {{lat}} and {{lng}}");
        }
        if self.render.viewport_width == 0 || self.render.viewport_height == 0 {
            bail!("[render] viewport must be non-empty");
        }
        if NonZeroU32::new(self.render.requests_per_second).is_none() {
            bail!("[render] requests_per_second must be >= 1");
        }
        self.layout.validate().context("invalid [layout]")?;
        if self.capture.concurrency == 0 {
            bail!("[capture] concurrency must be >= 1");
        }
        for rule in &self.capture.skip {
            if rule.x >= cols || rule.y >= rows {
                bail!("[[capture.skip]] cell ({}, {}) is outside the {cols}x{rows} grid", rule.x, rule.y);
            }
        }
        if self.mosaic.isolate_concurrency == 0 {
            bail!("[mosaic] isolate_concurrency must be >= 1");
        }
        if self.sync.page_size == 0 || self.sync.commit_batch == 0 {
            bail!("[sync] page_size and commit_batch must be >= 1");
        }
        if self.schedule.interval_secs == 0 {
            bail!("[schedule] interval_secs must be >= 1");
        }
        self.schedule.cadence().context("invalid [schedule]")?;
        Ok(())
    }

    pub fn classifier(&self) -> ColorClassifier {
        ColorClassifier::new(
            self.classifier.palette,
            self.classifier.threshold,
            self.layout.content_rect(),
        )
    }

    /// Remote store URL from `REMOTE_DATABASE_URL`.
    pub fn remote_database_url() -> anyhow::Result<String> {
        Ok(get_env_var(REMOTE_DATABASE_URL)?)
    }
}

/// Parse a configuration from a TOML string and validate it.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read a configuration file from disk, parse, and validate it.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str(&text)
}
