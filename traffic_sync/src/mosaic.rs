//! Mosaic composition and its inverse.
//!
//! ## Forward
//! Every tile of a batch is cropped to the content rectangle and pasted at
//! `(x * content_width, y * content_height)` on a transparent RGBA canvas of
//! `cols * content_width` by `rows * content_height`. Missing or unreadable
//! tiles leave their cell blank. Optional labels print `"row, col"` in a small
//! white box at each placed tile's top-left corner.
//!
//! ## Inverse
//! [`MosaicComposer::isolate`] cuts one cell back out of a mosaic.
//! [`MosaicComposer::isolate_all`] does so for every stored mosaic with bounded
//! concurrency, producing a per-cell time series of images.

mod glyphs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, Rgba, RgbaImage, imageops};
use thiserror::Error;
use tile_capture::models::key::PNG_EXT;
use tile_capture::models::{GridCell, TileKey};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::layout::TileLayout;
use crate::png;

/// Label box size in pixels.
pub const LABEL_WIDTH: u32 = 50;
pub const LABEL_HEIGHT: u32 = 20;
const LABEL_PAD_X: u32 = 2;
const LABEL_PAD_Y: u32 = 6;

/// Default number of mosaics isolated at once.
pub const DEFAULT_ISOLATE_CONCURRENCY: usize = 6;

#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("cell {cell} is outside the {cols}x{rows} grid")]
    CellOutOfRange { cell: GridCell, cols: u32, rows: u32 },

    #[error("mosaic is {width}x{height}, too small to contain cell {cell}")]
    MosaicTooSmall { width: u32, height: u32, cell: GridCell },

    #[error("image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("isolate task failed: {0}")]
    Task(String),
}

/// Result of composing one batch.
#[derive(Debug)]
pub struct Composed {
    pub image: RgbaImage,
    pub placed: Vec<GridCell>,
}

/// Result of [`MosaicComposer::isolate_all`].
#[derive(Debug, Default)]
pub struct IsolateReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, MosaicError)>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicComposer {
    layout: TileLayout,
    rows: u32,
    cols: u32,
    labels: bool,
}

impl MosaicComposer {
    /// `rows` and `cols` are the grid dimensions from the planner.
    pub fn new(layout: TileLayout, rows: u32, cols: u32) -> Self {
        Self {
            layout,
            rows,
            cols,
            labels: false,
        }
    }

    pub fn with_labels(mut self, labels: bool) -> Self {
        self.labels = labels;
        self
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// `(width, height)` of a full mosaic.
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            self.cols * self.layout.content_width(),
            self.rows * self.layout.content_height(),
        )
    }

    fn in_grid(&self, cell: GridCell) -> bool {
        cell.x < self.cols && cell.y < self.rows
    }

    /// Paste `tiles` onto a fresh canvas.
    pub fn compose<'a, I>(&self, tiles: I) -> Composed
    where
        I: IntoIterator<Item = (GridCell, &'a DynamicImage)>,
    {
        let (width, height) = self.canvas_size();
        let mut canvas = RgbaImage::new(width, height);
        let mut placed = Vec::new();

        for (cell, tile) in tiles {
            if self.paste(&mut canvas, cell, tile) {
                placed.push(cell);
            }
        }
        if self.labels {
            for cell in &placed {
                self.draw_label(&mut canvas, *cell);
            }
        }
        Composed {
            image: canvas,
            placed,
        }
    }

    fn paste(&self, canvas: &mut RgbaImage, cell: GridCell, tile: &DynamicImage) -> bool {
        if !self.in_grid(cell) {
            warn!(%cell, cols = self.cols, rows = self.rows, "tile outside grid, not placed");
            return false;
        }
        let Some(content) = self.layout.content_rect().clamp_to(tile.width(), tile.height()) else {
            warn!(%cell, width = tile.width(), height = tile.height(), "tile has no content area");
            return false;
        };
        if (tile.width(), tile.height()) != (self.layout.tile_width, self.layout.tile_height) {
            debug!(%cell, width = tile.width(), height = tile.height(), "unexpected tile size");
        }

        let rgba = tile.to_rgba8();
        let cropped =
            imageops::crop_imm(&rgba, content.x, content.y, content.width, content.height).to_image();
        let ox = i64::from(cell.x * self.layout.content_width());
        let oy = i64::from(cell.y * self.layout.content_height());
        imageops::replace(canvas, &cropped, ox, oy);
        true
    }

    fn draw_label(&self, canvas: &mut RgbaImage, cell: GridCell) {
        let cw = self.layout.content_width();
        let ch = self.layout.content_height();
        let (x0, y0) = (cell.x * cw, cell.y * ch);
        // Stay inside this cell's region.
        let x1 = x0 + LABEL_WIDTH.min(cw);
        let y1 = y0 + LABEL_HEIGHT.min(ch);

        let white = Rgba([255, 255, 255, 255]);
        for y in y0..y1 {
            for x in x0..x1 {
                canvas.put_pixel(x, y, white);
            }
        }
        let text = format!("{}, {}", cell.y, cell.x);
        glyphs::draw_text(
            canvas,
            x0 + LABEL_PAD_X,
            y0 + LABEL_PAD_Y,
            &text,
            Rgba([0, 0, 0, 255]),
            (x0, y0, x1, y1),
        );
    }

    /// Compose every `<prefix>*.png` tile in `dir`, decoding one tile at a time.
    pub fn compose_dir(&self, dir: &Path, prefix: &str) -> Result<Composed, MosaicError> {
        let (width, height) = self.canvas_size();
        let mut canvas = RgbaImage::new(width, height);
        let mut placed = Vec::new();

        for path in list_png(dir, prefix)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = match TileKey::parse(name) {
                Ok(key) => key,
                Err(e) => {
                    debug!(file = name, error = %e, "not a tile, ignored");
                    continue;
                }
            };
            match image::open(&path) {
                Ok(tile) => {
                    if self.paste(&mut canvas, key.cell, &tile) {
                        placed.push(key.cell);
                    }
                }
                Err(e) => warn!(file = %path.display(), error = %e, "unreadable tile, cell left blank"),
            }
        }
        if self.labels {
            for cell in &placed {
                self.draw_label(&mut canvas, *cell);
            }
        }

        let expected = (self.rows * self.cols) as usize;
        if placed.len() < expected {
            warn!(
                dir = %dir.display(),
                prefix,
                placed = placed.len(),
                missing = expected - placed.len(),
                "mosaic has blank cells"
            );
        }
        Ok(Composed {
            image: canvas,
            placed,
        })
    }

    /// Cut `cell` out of `mosaic`.
    pub fn isolate(&self, mosaic: &RgbaImage, cell: GridCell) -> Result<RgbaImage, MosaicError> {
        self.check_cell(cell)?;
        let cw = self.layout.content_width();
        let ch = self.layout.content_height();
        let (x, y) = (cell.x * cw, cell.y * ch);
        if x + cw > mosaic.width() || y + ch > mosaic.height() {
            return Err(MosaicError::MosaicTooSmall {
                width: mosaic.width(),
                height: mosaic.height(),
                cell,
            });
        }
        Ok(imageops::crop_imm(mosaic, x, y, cw, ch).to_image())
    }

    fn check_cell(&self, cell: GridCell) -> Result<(), MosaicError> {
        if self.in_grid(cell) {
            Ok(())
        } else {
            Err(MosaicError::CellOutOfRange {
                cell,
                cols: self.cols,
                rows: self.rows,
            })
        }
    }

    /// Read the mosaic at `src`, isolate `cell` and write it to `dst`.
    pub fn isolate_file(&self, src: &Path, dst: &Path, cell: GridCell) -> Result<(), MosaicError> {
        let mosaic = image::open(src)
            .map_err(|source| MosaicError::Image {
                path: src.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let piece = self.isolate(&mosaic, cell)?;
        png::save_rgba(dst, &piece).map_err(|source| MosaicError::Image {
            path: dst.to_path_buf(),
            source,
        })
    }

    /// Isolate `cell` from every `*.png` in `mosaic_dir` into `out_dir`, keeping
    /// file names. At most `limit` mosaics are decoded at once.
    pub async fn isolate_all(
        &self,
        mosaic_dir: &Path,
        out_dir: &Path,
        cell: GridCell,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<IsolateReport, MosaicError> {
        self.check_cell(cell)?;
        let sources = list_png(mosaic_dir, "")?;
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let mut tasks = JoinSet::new();
        let mut report = IsolateReport::default();

        for src in sources {
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
                    Err(_) => break,
                },
            };
            let Some(name) = src.file_name() else { continue };
            let dst = out_dir.join(name);
            let composer = *self;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let outcome = composer.isolate_file(&src, &dst, cell);
                (dst, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((dst, Ok(()))) => report.written.push(dst),
                Ok((dst, Err(e))) => {
                    warn!(file = %dst.display(), error = %e, "isolate failed");
                    report.failures.push((dst, e));
                }
                Err(e) => {
                    warn!(error = %e, "isolate task did not complete");
                    report
                        .failures
                        .push((out_dir.to_path_buf(), MosaicError::Task(e.to_string())));
                }
            }
        }

        report.written.sort();
        info!(
            %cell,
            written = report.written.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "isolate finished"
        );
        Ok(report)
    }
}

/// `*.png` files in `dir` whose names start with `prefix`, sorted by name.
pub fn list_png(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, MosaicError> {
    let io_err = |source| MosaicError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix) && n.ends_with(PNG_EXT));
        if matches && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
