//! Tile geometry in pixels: the full screenshot and the map content inside it.
//!
//! ```text
//! +--------------------------- width ----------------------------+
//! |                          top                                 |
//! | left  +------------ content ------------+  right             |
//! |       |                                 |                    |
//! |       +---------------------------------+                    |
//! |                          bottom                              |
//! +--------------------------------------------------------------+
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Margins do not leave any content inside the tile.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("margins {left}+{right} x {top}+{bottom} leave no content in a {width}x{height} tile")]
pub struct LayoutError {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Part of `self` inside a `width` x `height` image, if any.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(Rect {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px - self.x < self.width && py - self.y < self.height
    }
}

/// Screenshot size and the margins around its map content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TileLayout {
    pub tile_width: u32,
    pub tile_height: u32,
    pub margin_left: u32,
    pub margin_top: u32,
    pub margin_right: u32,
    pub margin_bottom: u32,
}

impl Default for TileLayout {
    fn default() -> Self {
        Self {
            tile_width: 1280,
            tile_height: 800,
            margin_left: 170,
            margin_top: 230,
            margin_right: 260,
            margin_bottom: 50,
        }
    }
}

impl TileLayout {
    /// Reject margins that swallow the whole tile.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let horizontal = self.margin_left.saturating_add(self.margin_right);
        let vertical = self.margin_top.saturating_add(self.margin_bottom);
        if horizontal >= self.tile_width || vertical >= self.tile_height {
            return Err(LayoutError {
                width: self.tile_width,
                height: self.tile_height,
                left: self.margin_left,
                top: self.margin_top,
                right: self.margin_right,
                bottom: self.margin_bottom,
            });
        }
        Ok(())
    }

    pub fn content_width(&self) -> u32 {
        self.tile_width
            .saturating_sub(self.margin_left)
            .saturating_sub(self.margin_right)
    }

    pub fn content_height(&self) -> u32 {
        self.tile_height
            .saturating_sub(self.margin_top)
            .saturating_sub(self.margin_bottom)
    }

    pub fn content_rect(&self) -> Rect {
        Rect {
            x: self.margin_left,
            y: self.margin_top,
            width: self.content_width(),
            height: self.content_height(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_content_is_850_by_520() {
        let layout = TileLayout::default();
        layout.validate().unwrap();
        assert_eq!(
            layout.content_rect(),
            Rect {
                x: 170,
                y: 230,
                width: 850,
                height: 520
            }
        );
    }

    #[test]
    fn clamp_intersects_with_image_bounds() {
        let r = TileLayout::default().content_rect();
        assert_eq!(r.clamp_to(1280, 800), Some(r));
        assert_eq!(
            r.clamp_to(600, 400),
            Some(Rect {
                x: 170,
                y: 230,
                width: 430,
                height: 170
            })
        );
        assert_eq!(r.clamp_to(100, 800), None);
    }

    #[test]
    fn margins_must_leave_content() {
        let layout = TileLayout {
            margin_left: 700,
            margin_right: 600,
            ..TileLayout::default()
        };
        assert!(layout.validate().is_err());
    }
}
