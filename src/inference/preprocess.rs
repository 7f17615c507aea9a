//! Frame preprocessing for the steering model.
//!
//! Steps, in order, matching what the model saw during training:
//! 1. optional crop to a region of interest
//! 2. RGB -> YUV (BT.601, chroma offset 128), scaled to [0, 1]
//! 3. 3x3 Gaussian blur, reflect-101 borders
//! 4. bilinear resize to the model input size
//!
//! Scaling commutes with the blur and the resize, so it happens up front and
//! every later step works on `[0, 1]` floats. The result is a packed HWC
//! `f32` buffer.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, Rgb32FImage};

use crate::frame::{Frame, Roi, CHANNELS};

/// Default model input width.
pub const DEFAULT_INPUT_WIDTH: u32 = 200;
/// Default model input height.
pub const DEFAULT_INPUT_HEIGHT: u32 = 66;

/// `[1 2 1; 2 4 2; 1 2 1] / 16`
const GAUSSIAN_3X3: [f32; 9] = [
    1.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
    2.0 / 16.0,
    4.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
];

#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    pub crop: Option<Roi>,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            crop: None,
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
        }
    }
}

/// Preprocessed model input, HWC order.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInput {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl ModelInput {
    pub fn value(&self, x: u32, y: u32, channel: u32) -> f32 {
        let idx = ((y * self.width + x) * self.channels + channel) as usize;
        self.data[idx]
    }
}

pub fn preprocess(frame: &Frame, config: &PreprocessConfig) -> Result<ModelInput> {
    if config.input_width == 0 || config.input_height == 0 {
        return Err(anyhow!(
            "model input size {}x{} is empty",
            config.input_width,
            config.input_height
        ));
    }
    let cropped;
    let frame = match &config.crop {
        Some(roi) => {
            cropped = frame.crop(roi)?;
            &cropped
        }
        None => frame,
    };
    if frame.is_empty() {
        return Err(anyhow!("cannot preprocess an empty frame"));
    }

    let yuv = rgb_to_yuv(frame)?;
    let blurred = gaussian_blur(&yuv);
    let resized = imageops::resize(
        &blurred,
        config.input_width,
        config.input_height,
        FilterType::Triangle,
    );

    Ok(ModelInput {
        data: resized.into_raw(),
        width: config.input_width,
        height: config.input_height,
        channels: CHANNELS as u32,
    })
}

/// Convert to YUV with every channel scaled into `[0, 1]`.
fn rgb_to_yuv(frame: &Frame) -> Result<Rgb32FImage> {
    let mut data = Vec::with_capacity(frame.pixels().len());
    for rgb in frame.pixels().chunks_exact(CHANNELS) {
        let (r, g, b) = (rgb[0] as f32, rgb[1] as f32, rgb[2] as f32);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let u = 0.492 * (b - y) + 128.0;
        let v = 0.877 * (r - y) + 128.0;
        data.extend_from_slice(&[
            y.clamp(0.0, 255.0) / 255.0,
            u.clamp(0.0, 255.0) / 255.0,
            v.clamp(0.0, 255.0) / 255.0,
        ]);
    }
    ImageBuffer::from_raw(frame.width, frame.height, data)
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))
}

/// Reflect-101 index: `-1 -> 1`, `len -> len - 2`.
fn reflect101(idx: i64, len: u32) -> u32 {
    if len == 1 {
        return 0;
    }
    let last = len as i64 - 1;
    let idx = if idx < 0 {
        -idx
    } else if idx > last {
        2 * last - idx
    } else {
        idx
    };
    idx.clamp(0, last) as u32
}

/// 3x3 Gaussian with reflect-101 borders.
///
/// `filter3x3` does not read outside the image, so the input is padded by one
/// mirrored pixel on every side and the interior is cut back out afterwards.
fn gaussian_blur(image: &Rgb32FImage) -> Rgb32FImage {
    let (width, height) = image.dimensions();
    let padded: Rgb32FImage = ImageBuffer::from_fn(width + 2, height + 2, |x, y| {
        let sx = reflect101(x as i64 - 1, width);
        let sy = reflect101(y as i64 - 1, height);
        *image.get_pixel(sx, sy)
    });
    let filtered: ImageBuffer<Rgb<f32>, Vec<f32>> = imageops::filter3x3(&padded, &GAUSSIAN_3X3);
    imageops::crop_imm(&filtered, 1, 1, width, height).to_image()
}
