//! Captured frames and region-of-interest cropping.
//!
//! A `Frame` is a packed 8-bit, 3-channel raster in the camera's native color
//! order. Conversion into the model's color space happens in preprocessing,
//! never here.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

/// Number of interleaved channels in every frame.
pub const CHANNELS: usize = 3;

/// A captured camera frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap a packed RGB24 buffer. The length must match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = packed_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// A frame filled with a single color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel at (x, y) as an RGB triple.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Copy into an `image` buffer.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
        }
    }

    /// Keep only the sub-rectangle described by `roi`.
    pub fn crop(&self, roi: &Roi) -> Result<Frame> {
        let rect = roi.to_pixels(self.width, self.height)?;
        let image = self.to_image()?;
        let view = imageops::crop_imm(&image, rect.x, rect.y, rect.width, rect.height);
        Ok(Frame::from_image(view.to_image()))
    }

    /// Scale to exactly `width` x `height` with bilinear filtering.
    pub fn resize(&self, width: u32, height: u32) -> Result<Frame> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize a frame to {}x{}", width, height));
        }
        if (width, height) == (self.width, self.height) {
            return Ok(self.clone());
        }
        let image = self.to_image()?;
        Ok(Frame::from_image(imageops::resize(
            &image,
            width,
            height,
            FilterType::Triangle,
        )))
    }
}

fn packed_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Region of interest expressed as fractions of the frame size.
///
/// `(x, y)` is the top-left corner, `(width, height)` the extent, all in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Pixel rectangle produced from a `Roi`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self> {
        let roi = Self {
            x,
            y,
            width,
            height,
        };
        roi.validate()?;
        Ok(roi)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [self.x, self.y, self.width, self.height];
        if fields.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(anyhow!("roi fractions must lie in [0, 1]: {:?}", self));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(anyhow!("roi must have a non-zero extent: {:?}", self));
        }
        if self.x + self.width > 1.0 + f32::EPSILON || self.y + self.height > 1.0 + f32::EPSILON
        {
            return Err(anyhow!("roi extends past the frame edge: {:?}", self));
        }
        Ok(())
    }

    /// Resolve the fractions against a concrete frame size.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> Result<PixelRect> {
        self.validate()?;
        let x = (self.x * frame_width as f32).round() as u32;
        let y = (self.y * frame_height as f32).round() as u32;
        let x = x.min(frame_width);
        let y = y.min(frame_height);
        let width = ((self.width * frame_width as f32).round() as u32).min(frame_width - x);
        let height = ((self.height * frame_height as f32).round() as u32).min(frame_height - y);
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "roi {:?} is empty on a {}x{} frame",
                self,
                frame_width,
                frame_height
            ));
        }
        Ok(PixelRect {
            x,
            y,
            width,
            height,
        })
    }
}
