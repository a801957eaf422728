//! Fixture builders shared by the conformance tests.

use std::path::Path;

use anyhow::Result;
use image::{ImageBuffer, Rgb, Rgba, RgbaImage};

/// Checkerboard RGBA PNG whose top-left pixel is fully transparent.
pub fn write_transparent_png(path: &Path, width: u32, height: u32) -> Result<()> {
    let img: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| {
        if x == 0 && y == 0 {
            Rgba([0, 0, 0, 0])
        } else if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([10, 10, 10, 96])
        }
    });
    img.save(path)?;
    Ok(())
}

/// Opaque gradient in whatever format the extension names.
pub fn write_opaque(path: &Path, width: u32, height: u32) -> Result<()> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    img.save(path)?;
    Ok(())
}
