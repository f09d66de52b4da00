//! PNG encoding and atomic file writes for masks and mosaics.

use std::path::Path;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageError, RgbaImage};

/// Encode raw pixels as PNG.
pub fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buf, CompressionType::Default, FilterType::Adaptive);
    encoder.write_image(pixels, width, height, color)?;
    Ok(buf)
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let partial = path.with_extension("png.part");
    std::fs::write(&partial, bytes)?;
    std::fs::rename(&partial, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&partial);
    })
}

pub fn save_gray(path: &Path, img: &GrayImage) -> Result<(), ImageError> {
    let bytes = encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::L8)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

pub fn save_rgba(path: &Path, img: &RgbaImage) -> Result<(), ImageError> {
    let bytes = encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgba};

    use super::*;

    #[test]
    fn saved_images_decode_to_the_same_pixels() {
        let dir = tempfile::TempDir::new().unwrap();

        let gray = GrayImage::from_fn(7, 3, |x, y| Luma([(x * 30 + y) as u8]));
        let gray_path = dir.path().join("mask.png");
        save_gray(&gray_path, &gray).unwrap();
        assert_eq!(image::open(&gray_path).unwrap().to_luma8(), gray);

        let rgba = RgbaImage::from_fn(4, 5, |x, y| Rgba([x as u8, y as u8, 9, if x == 0 { 0 } else { 255 }]));
        let rgba_path = dir.path().join("mosaic.png");
        save_rgba(&rgba_path, &rgba).unwrap();
        assert_eq!(image::open(&rgba_path).unwrap().to_rgba8(), rgba);
        assert!(!dir.path().join("mosaic.png.part").exists());
    }
}
