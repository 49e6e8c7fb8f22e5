//! Working-resolution frames.
//!
//! A `Frame` is the raster image flowing through one pipeline instance.
//! Ownership is single-threaded within a pipeline; stages either annotate
//! the frame in place (overlay) or read it (detectors, JPEG encode).

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// Default working resolution streams are resized to before processing.
pub const DEFAULT_WIDTH: u32 = 1000;
pub const DEFAULT_HEIGHT: u32 = 500;

/// Axis-aligned integer pixel rectangle with `x1 < x2`, `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// Builds a box from corner coordinates, normalizing corner order and
    /// clamping to the given frame bounds.
    pub fn clamped(x1: i32, y1: i32, x2: i32, y2: i32, width: u32, height: u32) -> Self {
        let (lo_x, hi_x) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (lo_y, hi_y) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        let max_x = width.saturating_sub(1) as i32;
        let max_y = height.saturating_sub(1) as i32;
        let x1 = lo_x.clamp(0, max_x);
        let y1 = lo_y.clamp(0, max_y);
        // x1 < x2 wins over the upper clamp on degenerate 1px frames.
        let x2 = hi_x.clamp(x1 + 1, max_x.max(x1 + 1));
        let y2 = hi_y.clamp(y1 + 1, max_y.max(y1 + 1));
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Center point, used for region containment tests.
    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

/// RGB raster image at the pipeline's working resolution.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Solid-color frame, mainly for tests and synthetic sources.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Decode a JPEG (or any supported format) into a frame.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg frame")?;
        Ok(Self {
            image: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    /// Resize to the working resolution. A frame that already matches is
    /// returned unchanged without reallocating.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.image.width() == width && self.image.height() == height {
            return self;
        }
        let resized = image::imageops::resize(
            &self.image,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Self { image: resized }
    }

    /// Encode the current frame as JPEG bytes.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Jpeg)
            .context("encode jpeg frame")?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_clamps_to_frame_bounds() {
        let b = BBox::clamped(-10, -10, 2000, 900, 1000, 500);
        assert_eq!(b.x1, 0);
        assert_eq!(b.y1, 0);
        assert_eq!(b.x2, 999);
        assert_eq!(b.y2, 499);
    }

    #[test]
    fn bbox_normalizes_corner_order() {
        let b = BBox::clamped(50, 80, 10, 20, 100, 100);
        assert!(b.x1 < b.x2);
        assert!(b.y1 < b.y2);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (10, 20, 50, 80));
    }

    #[test]
    fn jpeg_roundtrip_preserves_dimensions() {
        let frame = Frame::solid(64, 32, [10, 200, 40]);
        let bytes = frame.to_jpeg().unwrap();
        let decoded = Frame::from_jpeg(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 32);
    }

    #[test]
    fn resize_to_working_resolution() {
        let frame = Frame::solid(64, 32, [0, 0, 0]);
        let resized = frame.resized(DEFAULT_WIDTH, DEFAULT_HEIGHT);
        assert_eq!(resized.width(), DEFAULT_WIDTH);
        assert_eq!(resized.height(), DEFAULT_HEIGHT);
    }
}
