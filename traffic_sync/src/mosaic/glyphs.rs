//! 5x7 bitmap font covering what grid labels need: digits, comma and space.

use image::{Rgba, RgbaImage};

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;
/// Horizontal distance between glyph origins.
pub const ADVANCE: u32 = GLYPH_WIDTH + 1;

// One byte per row, top to bottom; bit 4 is the leftmost column.
fn glyph(c: char) -> Option<[u8; 7]> {
    Some(match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ' ' => [0x00; 7],
        _ => return None,
    })
}

/// Draw `text` with its top-left corner at `(x, y)`, clipped to `clip`
/// (`x0, y0, x1, y1`, exclusive end). Unknown characters advance blank.
pub fn draw_text(
    canvas: &mut RgbaImage,
    x: u32,
    y: u32,
    text: &str,
    color: Rgba<u8>,
    clip: (u32, u32, u32, u32),
) {
    let (x0, y0, x1, y1) = clip;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let gx = x + i as u32 * ADVANCE;
        for (dy, bits) in rows.iter().enumerate() {
            for dx in 0..GLYPH_WIDTH {
                if bits & (0x10 >> dx) == 0 {
                    continue;
                }
                let (px, py) = (gx + dx, y + dy as u32);
                if px >= x0 && px < x1 && py >= y0 && py < y1 {
                    canvas.put_pixel(px, py, color);
                }
            }
        }
    }
}
