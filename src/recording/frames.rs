use std::path::Path;

use anyhow::{Context, Result};
use image::ImageFormat;

use crate::frame::Frame;

/// Persists captured frames inside a session directory.
pub trait FrameWriter {
    /// File extension of written frames (without the dot).
    fn extension(&self) -> &'static str;

    fn write(&mut self, frame: &Frame, path: &Path) -> Result<()>;
}

/// JPEG encoder backed by the `image` crate.
#[derive(Debug, Default)]
pub struct JpegFrameWriter;

impl JpegFrameWriter {
    pub fn new() -> Self {
        Self
    }
}

impl FrameWriter for JpegFrameWriter {
    fn extension(&self) -> &'static str {
        "jpg"
    }

    fn write(&mut self, frame: &Frame, path: &Path) -> Result<()> {
        frame
            .to_image()?
            .save_with_format(path, ImageFormat::Jpeg)
            .with_context(|| format!("write frame {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_round_trips_dimensions() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("image_0.jpg");
        let frame = Frame::filled(32, 16, [200, 40, 40]);
        JpegFrameWriter::new().write(&frame, &path)?;

        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 16));
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let frame = Frame::filled(4, 4, [0, 0, 0]);
        let result = JpegFrameWriter::new().write(&frame, Path::new("/nonexistent/dir/image_0.jpg"));
        assert!(result.is_err());
    }
}
