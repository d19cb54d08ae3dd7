//! 3x3 context grid assembly and center extraction.
//!
//! The image model works on a 3x3 mosaic: the eight surrounding tiles give
//! it visual context and the center cell is the one being generated. Absent
//! neighbors stay transparent so the model treats them as open canvas.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};

use crate::core::coords::TILE_SIZE;
use crate::core::error::GenerationError;
use crate::pyramid::compose::encode_webp;

/// Neighbor offsets in grid order: row by row, center excluded.
pub const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const GRID_SIZE: u32 = TILE_SIZE * 3;

/// Assemble the 3x3 context grid as a PNG.
///
/// `neighbors` follows [`NEIGHBOR_OFFSETS`]; `center` carries the cell's
/// current bytes when regenerating in place.
pub fn build_grid_png(
    neighbors: &[Option<Bytes>; 8],
    center: Option<&Bytes>,
) -> Result<Vec<u8>, GenerationError> {
    let mut canvas = RgbaImage::new(GRID_SIZE, GRID_SIZE);

    for ((dx, dy), tile) in NEIGHBOR_OFFSETS.iter().zip(neighbors) {
        if let Some(bytes) = tile {
            paste(&mut canvas, bytes, (dx + 1) as u32, (dy + 1) as u32);
        }
    }
    if let Some(bytes) = center {
        paste(&mut canvas, bytes, 1, 1);
    }

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn paste(canvas: &mut RgbaImage, bytes: &Bytes, col: u32, row: u32) {
    let Ok(img) = image::load_from_memory(bytes) else {
        // Undecodable context tile: leave the cell transparent.
        return;
    };
    let img = img.resize_exact(TILE_SIZE, TILE_SIZE, FilterType::Lanczos3);
    image::imageops::overlay(
        canvas,
        &img.to_rgba8(),
        i64::from(col * TILE_SIZE),
        i64::from(row * TILE_SIZE),
    );
}

/// Pull the center tile out of a generated grid image and re-encode it as
/// WebP. The model may return the grid at any resolution; it is normalized
/// to 3x3 tiles before cropping.
pub fn extract_center_tile(image_bytes: &[u8]) -> Result<Bytes, GenerationError> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| GenerationError::InvalidImage(e.to_string()))?;
    let img = img.resize_exact(GRID_SIZE, GRID_SIZE, FilterType::Lanczos3);
    let center = img.crop_imm(TILE_SIZE, TILE_SIZE, TILE_SIZE, TILE_SIZE);
    let webp = encode_webp(&center.to_rgba8())?;
    Ok(Bytes::from(webp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgba: [u8; 4], size: u32) -> Bytes {
        let img = RgbaImage::from_pixel(size, size, image::Rgba(rgba));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_grid_dimensions_and_neighbor_placement() {
        let mut neighbors: [Option<Bytes>; 8] = Default::default();
        neighbors[0] = Some(solid([255, 0, 0, 255], TILE_SIZE)); // top-left
        let png = build_grid_png(&neighbors, None).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (GRID_SIZE, GRID_SIZE));
        assert_eq!(img.get_pixel(10, 10).0, [255, 0, 0, 255]);
        // Center stays transparent.
        assert_eq!(img.get_pixel(GRID_SIZE / 2, GRID_SIZE / 2).0[3], 0);
    }

    #[test]
    fn test_extract_center_from_upscaled_grid() {
        // A model that returns the grid at double resolution.
        let grid = solid([0, 128, 0, 255], GRID_SIZE * 2);
        let tile = extract_center_tile(&grid).unwrap();
        let img = image::load_from_memory(&tile).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (TILE_SIZE, TILE_SIZE));
        assert_eq!(img.get_pixel(0, 0).0, [0, 128, 0, 255]);
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(matches!(
            extract_center_tile(b"not an image"),
            Err(GenerationError::InvalidImage(_))
        ));
    }
}
