//! Parent tile compositing.
//!
//! A parent tile is the 2x2 mosaic of its children downsampled back to one
//! tile. Compositing never fails: missing or undecodable children leave
//! their quadrant transparent, and an encoder failure falls back to the
//! shared placeholder tile.

use bytes::Bytes;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use once_cell::sync::Lazy;
use tracing::warn;

use crate::core::coords::TILE_SIZE;

static PLACEHOLDER: Lazy<Bytes> = Lazy::new(|| {
    let blank = RgbaImage::new(TILE_SIZE, TILE_SIZE);
    match encode_webp(&blank) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            warn!(error = %err, "placeholder encode failed");
            Bytes::new()
        }
    }
});

/// The transparent tile served wherever no content resolves.
pub fn placeholder_tile() -> Bytes {
    PLACEHOLDER.clone()
}

/// Lossless WebP encoding of an RGBA image.
pub fn encode_webp(img: &RgbaImage) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}

/// Compose a parent tile from its four children in NW, NE, SW, SE order.
pub fn compose_parent(children: &[Option<Bytes>; 4]) -> Bytes {
    let mut canvas = RgbaImage::new(TILE_SIZE * 2, TILE_SIZE * 2);
    for (i, child) in children.iter().enumerate() {
        let Some(bytes) = child else { continue };
        let img = match image::load_from_memory(bytes) {
            Ok(img) => img.to_rgba8(),
            Err(err) => {
                warn!(quadrant = i, error = %err, "child tile undecodable; leaving quadrant blank");
                continue;
            }
        };
        let x = (i as u32 % 2) * TILE_SIZE;
        let y = (i as u32 / 2) * TILE_SIZE;
        image::imageops::overlay(&mut canvas, &img, i64::from(x), i64::from(y));
    }

    let scaled = image::imageops::resize(&canvas, TILE_SIZE, TILE_SIZE, FilterType::Lanczos3);
    match encode_webp(&scaled) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            warn!(error = %err, "parent encode failed; substituting placeholder");
            placeholder_tile()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgba: [u8; 4]) -> Bytes {
        let img = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, image::Rgba(rgba));
        Bytes::from(encode_webp(&img).unwrap())
    }

    #[test]
    fn test_placeholder_is_a_transparent_tile() {
        let bytes = placeholder_tile();
        let img = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (TILE_SIZE, TILE_SIZE));
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_compose_output_is_one_tile() {
        let red = solid([255, 0, 0, 255]);
        let out = compose_parent(&[Some(red), None, None, None]);
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (TILE_SIZE, TILE_SIZE));
    }

    #[test]
    fn test_second_child_changes_composite() {
        let red = solid([255, 0, 0, 255]);
        let blue = solid([0, 0, 255, 255]);
        let one = compose_parent(&[Some(red.clone()), None, None, None]);
        let two = compose_parent(&[Some(red), Some(blue), None, None]);
        assert_ne!(one, two);
    }

    #[test]
    fn test_undecodable_child_is_skipped() {
        let garbage = Bytes::from_static(b"not an image");
        let out = compose_parent(&[Some(garbage), None, None, None]);
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        // Nothing landed on the canvas, so the composite stays transparent.
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }
}
