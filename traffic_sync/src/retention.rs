//! Disk-space retention for mosaics.
//!
//! Before each batch the free space on the mosaic device is checked. At or
//! below the threshold, the oldest screenshot mosaic (first `*.png` by name,
//! and names are stamps) is removed together with its mask mosaic.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::mosaic::{MosaicError, list_png};

/// 5 GiB.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Free bytes on the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    fn available(&self, path: &Path) -> std::io::Result<u64>;
}

/// [`SpaceProbe`] backed by `statvfs`/`GetDiskFreeSpaceEx` through `fs2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available(&self, path: &Path) -> std::io::Result<u64> {
        fs2::available_space(path)
    }
}

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to query free space on {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    List(#[from] MosaicError),

    #[error("failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a retention check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pruned {
    /// Enough space; nothing removed.
    NotNeeded { available: u64 },
    /// Low on space but no mosaic to remove.
    NothingToDelete { available: u64 },
    /// Removed this stamp's mosaic (and its mask mosaic if present).
    Deleted { name: String, mask_removed: bool },
}

pub struct RetentionManager<P = FsSpaceProbe> {
    probe: P,
    min_free_bytes: u64,
    mosaic_dir: PathBuf,
    mask_mosaic_dir: PathBuf,
}

impl RetentionManager<FsSpaceProbe> {
    pub fn new(mosaic_dir: PathBuf, mask_mosaic_dir: PathBuf, min_free_bytes: u64) -> Self {
        Self::with_probe(FsSpaceProbe, mosaic_dir, mask_mosaic_dir, min_free_bytes)
    }
}

impl<P: SpaceProbe> RetentionManager<P> {
    pub fn with_probe(
        probe: P,
        mosaic_dir: PathBuf,
        mask_mosaic_dir: PathBuf,
        min_free_bytes: u64,
    ) -> Self {
        Self {
            probe,
            min_free_bytes,
            mosaic_dir,
            mask_mosaic_dir,
        }
    }

    /// Remove the oldest mosaic pair if free space is at or below the threshold.
    pub fn prune_oldest(&self) -> Result<Pruned, RetentionError> {
        let available =
            self.probe
                .available(&self.mosaic_dir)
                .map_err(|source| RetentionError::Probe {
                    path: self.mosaic_dir.clone(),
                    source,
                })?;
        if available > self.min_free_bytes {
            return Ok(Pruned::NotNeeded { available });
        }

        let Some(oldest) = list_png(&self.mosaic_dir, "")?.into_iter().next() else {
            warn!(available, dir = %self.mosaic_dir.display(), "low on space but no mosaic to delete");
            return Ok(Pruned::NothingToDelete { available });
        };
        let Some(name) = oldest.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(Pruned::NothingToDelete { available });
        };

        std::fs::remove_file(&oldest).map_err(|source| RetentionError::Delete {
            path: oldest.clone(),
            source,
        })?;

        let mask = self.mask_mosaic_dir.join(&name);
        let mask_removed = match std::fs::remove_file(&mask) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %mask.display(), "mask mosaic already missing");
                false
            }
            Err(source) => return Err(RetentionError::Delete { path: mask, source }),
        };

        info!(available, file = %name, mask_removed, "deleted oldest mosaic to free space");
        Ok(Pruned::Deleted { name, mask_removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl SpaceProbe for Fixed {
        fn available(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(self.0)
        }
    }

    fn dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::TempDir::new().unwrap();
        let ss = root.path().join("ss-comb");
        let mask = root.path().join("mask-comb");
        std::fs::create_dir_all(&ss).unwrap();
        std::fs::create_dir_all(&mask).unwrap();
        for name in ["20240315-000000.png", "20240314-090000.png", "20240314-100000.png"] {
            std::fs::write(ss.join(name), b"x").unwrap();
            std::fs::write(mask.join(name), b"x").unwrap();
        }
        (root, ss, mask)
    }

    #[test]
    fn deletes_the_oldest_pair_when_low() {
        let (_root, ss, mask) = dirs();
        let mgr = RetentionManager::with_probe(Fixed(10), ss.clone(), mask.clone(), 10);

        let outcome = mgr.prune_oldest().unwrap();
        assert_eq!(
            outcome,
            Pruned::Deleted {
                name: "20240314-090000.png".into(),
                mask_removed: true
            }
        );
        assert!(!ss.join("20240314-090000.png").exists());
        assert!(!mask.join("20240314-090000.png").exists());
        assert!(ss.join("20240314-100000.png").exists());
    }

    #[test]
    fn leaves_everything_when_space_is_plenty() {
        let (_root, ss, mask) = dirs();
        let mgr = RetentionManager::with_probe(Fixed(11), ss.clone(), mask, 10);
        assert_eq!(mgr.prune_oldest().unwrap(), Pruned::NotNeeded { available: 11 });
        assert_eq!(std::fs::read_dir(&ss).unwrap().count(), 3);
    }

    #[test]
    fn missing_mask_is_not_an_error() {
        let (_root, ss, mask) = dirs();
        std::fs::remove_file(mask.join("20240314-090000.png")).unwrap();
        let mgr = RetentionManager::with_probe(Fixed(0), ss, mask, DEFAULT_MIN_FREE_BYTES);
        assert!(matches!(
            mgr.prune_oldest().unwrap(),
            Pruned::Deleted { mask_removed: false, .. }
        ));
    }

    #[test]
    fn real_probe_reports_space() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(FsSpaceProbe.available(dir.path()).unwrap() > 0);
    }
}
