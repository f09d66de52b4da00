//! Pixel classification of the traffic overlay.
//!
//! ## What this does
//! Every pixel is compared against three palette colors in priority order
//! (dark red, red, yellow). A pixel matches a color when each RGB channel is
//! within `threshold` of it; the first match wins, anything else is
//! background. The result is a grayscale mask covering the whole tile plus
//! per-severity counts taken over the content rectangle only.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::Rect;

/// Congestion level of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Background,
    /// Moderate.
    Yellow,
    /// Heavy.
    Red,
    /// Severe.
    DarkRed,
}

impl Severity {
    /// Gray level written to the mask.
    pub const fn mask_value(self) -> u8 {
        match self {
            Severity::Background => 0,
            Severity::Yellow => 100,
            Severity::Red => 178,
            Severity::DarkRed => 255,
        }
    }

    pub const fn from_mask_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Severity::Background),
            100 => Some(Severity::Yellow),
            178 => Some(Severity::Red),
            255 => Some(Severity::DarkRed),
            _ => None,
        }
    }
}

/// Reference colors of the traffic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Palette {
    pub dark_red: [u8; 3],
    pub red: [u8; 3],
    pub yellow: [u8; 3],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            dark_red: [0xA9, 0x27, 0x27],
            red: [0xF2, 0x4E, 0x42],
            yellow: [0xFF, 0xCF, 0x43],
        }
    }
}

/// Default per-channel tolerance.
pub const DEFAULT_THRESHOLD: u8 = 10;

/// Pixel counts per severity; background is not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub yellow: u32,
    pub red: u32,
    pub dark_red: u32,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Background => {}
            Severity::Yellow => self.yellow += 1,
            Severity::Red => self.red += 1,
            Severity::DarkRed => self.dark_red += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.yellow + self.red + self.dark_red
    }
}

/// Mask plus counts for one tile.
#[derive(Debug, Clone)]
pub struct Classification {
    pub mask: GrayImage,
    pub counts: SeverityCounts,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Bytes are not a decodable image.
    #[error("failed to decode tile image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct ColorClassifier {
    // Priority order: first entry wins.
    ordered: [(Severity, Rgb<u8>); 3],
    threshold: u8,
    content: Rect,
}

impl ColorClassifier {
    pub fn new(palette: Palette, threshold: u8, content: Rect) -> Self {
        Self {
            ordered: [
                (Severity::DarkRed, Rgb(palette.dark_red)),
                (Severity::Red, Rgb(palette.red)),
                (Severity::Yellow, Rgb(palette.yellow)),
            ],
            threshold,
            content,
        }
    }

    /// Severity of a single RGB pixel.
    pub fn classify_pixel(&self, px: Rgb<u8>) -> Severity {
        self.ordered
            .iter()
            .find(|(_, reference)| self.is_close(px, *reference))
            .map_or(Severity::Background, |(severity, _)| *severity)
    }

    fn is_close(&self, px: Rgb<u8>, reference: Rgb<u8>) -> bool {
        px.0.iter()
            .zip(reference.0.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.threshold)
    }

    /// Decode `bytes` (any format the `image` crate knows) and classify.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Classification, ClassifyError> {
        let img = image::load_from_memory(bytes)?;
        Ok(self.classify_image(&img))
    }

    pub fn classify_image(&self, img: &DynamicImage) -> Classification {
        self.classify_rgb(&img.to_rgb8())
    }

    pub fn classify_rgb(&self, rgb: &RgbImage) -> Classification {
        let (width, height) = rgb.dimensions();
        let content = self.content.clamp_to(width, height);
        let mut mask = GrayImage::new(width, height);
        let mut counts = SeverityCounts::default();

        for (x, y, px) in rgb.enumerate_pixels() {
            let severity = self.classify_pixel(*px);
            mask.put_pixel(x, y, Luma([severity.mask_value()]));
            if content.is_some_and(|r| r.contains(x, y)) {
                counts.bump(severity);
            }
        }

        Classification { mask, counts }
    }
}
