//! V4L2 camera.
//!
//! `V4l2Camera` captures from a local device node (e.g. /dev/video0) through
//! libv4l, or generates synthetic frames for `stub://` paths. Frames are
//! normalised to packed RGB, scaled to the configured size when the driver
//! negotiated a different one, and cropped to the region of interest before
//! they are handed out.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "ingest-v4l2")]
use std::time::Instant;

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{to_rgb_frame, PixelFormat};
use super::{CameraConfig, CameraFault, CameraFaultKind, FrameSource};
use crate::frame::Frame;

/// V4L2 camera with a synthetic fallback for `stub://` paths.
pub struct V4l2Camera {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if let Some(roi) = &config.roi {
            roi.validate()?;
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: V4l2Backend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }

    /// Capture statistics.
    pub fn stats(&self) -> V4l2Stats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

impl FrameSource for V4l2Camera {
    fn name(&self) -> &str {
        match &self.backend {
            V4l2Backend::Synthetic(source) => &source.config.device,
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => &source.config.device,
        }
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let (frame, config) = match &mut self.backend {
            V4l2Backend::Synthetic(source) => (source.next_frame()?, &source.config),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => (source.next_frame()?, &source.config),
        };
        fit_frame(frame, config)
    }

    fn release(&mut self) {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.release(),
        }
    }
}

/// Scale a raw capture to the configured size, then crop it to the ROI.
fn fit_frame(frame: Frame, config: &CameraConfig) -> Result<Frame> {
    if frame.is_empty() {
        return Err(anyhow::Error::new(CameraFault::new(
            CameraFaultKind::Empty,
            format!("{} returned an empty frame", config.device),
        )));
    }
    // Drivers may refuse the requested size; recordings always use it.
    let frame = if (frame.width, frame.height) != (config.width, config.height) {
        frame.resize(config.width, config.height)?
    } else {
        frame
    };
    match &config.roi {
        Some(roi) => frame.crop(roi),
        None => Ok(frame),
    }
}

/// Statistics for a camera.
#[derive(Clone, Debug)]
pub struct V4l2Stats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and dry runs
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    connected: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "V4l2Camera: connected to {} (synthetic {}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow::Error::new(CameraFault::new(
                CameraFaultKind::Device,
                format!("{} is not connected", self.config.device),
            )));
        }
        self.frame_count += 1;
        Frame::new(
            self.generate_synthetic_pixels(),
            self.config.width,
            self.config.height,
        )
    }

    /// A horizontal gradient that drifts a little every frame.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let shade = ((x as u64 + self.frame_count) % 256) as u8;
                pixels.extend_from_slice(&[shade, (y % 256) as u8, 255 - shade]);
            }
        }
        pixels
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("V4l2Camera: released {}", self.config.device);
        }
        self.connected = false;
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
    format: PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            format: PixelFormat::Rgb24,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        if (format.width, format.height) != (self.config.width, self.config.height) {
            log::warn!(
                "V4l2Camera: {} negotiated {}x{} instead of {}x{}; frames will be resized",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }

        let timeout = self.config.timeout;
        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(anyhow::Error::new(CameraFault::new(
                CameraFaultKind::Device,
                format!("{} is not connected", self.config.device),
            )));
        };
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let device = &self.config.device;
        let frame = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, _meta)) => to_rgb_frame(buf, width, height, format).map_err(|err| {
                anyhow::Error::new(CameraFault::new(CameraFaultKind::Empty, err.to_string()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Err(anyhow::Error::new(
                CameraFault::new(CameraFaultKind::Timeout, format!("{}: {}", device, err)),
            )),
            Err(err) => Err(anyhow::Error::new(CameraFault::new(
                CameraFaultKind::Device,
                format!("{}: {}", device, err),
            ))),
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: released {} after {} frames (last frame {:?} ago)",
                self.config.device,
                self.frame_count,
                self.last_frame_at.map(|at| at.elapsed())
            );
        }
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Roi;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 240,
            height: 120,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn synthetic_camera_produces_frames() -> Result<()> {
        let mut camera = V4l2Camera::new(stub_config())?;
        camera.connect()?;

        let frame = camera.next_frame()?;
        assert_eq!(frame.width, 240);
        assert_eq!(frame.height, 120);
        assert_eq!(camera.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn synthetic_camera_applies_roi() -> Result<()> {
        let mut config = stub_config();
        config.roi = Some(Roi::new(0.0, 0.2, 0.8, 0.8)?);
        let mut camera = V4l2Camera::new(config)?;
        camera.connect()?;

        let frame = camera.next_frame()?;
        assert_eq!(frame.width, 192);
        assert_eq!(frame.height, 96);
        Ok(())
    }

    #[test]
    fn oversized_capture_is_scaled_before_cropping() -> Result<()> {
        let mut config = stub_config();
        let raw = Frame::filled(320, 240, [10, 20, 30]);
        let frame = fit_frame(raw.clone(), &config)?;
        assert_eq!((frame.width, frame.height), (240, 120));
        assert_eq!(frame.pixel(100, 50), [10, 20, 30]);

        config.roi = Some(Roi::new(0.0, 0.2, 0.8, 0.8)?);
        let frame = fit_frame(raw, &config)?;
        assert_eq!((frame.width, frame.height), (192, 96));
        Ok(())
    }

    #[test]
    fn empty_capture_is_a_transient_fault() {
        let err = fit_frame(Frame::filled(0, 0, [0, 0, 0]), &stub_config()).unwrap_err();
        assert_eq!(CameraFault::classify(&err), CameraFaultKind::Empty);
    }

    #[test]
    fn capture_before_connect_is_a_device_fault() -> Result<()> {
        let mut camera = V4l2Camera::new(stub_config())?;
        let err = camera.next_frame().unwrap_err();
        assert_eq!(CameraFault::classify(&err), CameraFaultKind::Device);
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> Result<()> {
        let mut camera = V4l2Camera::new(stub_config())?;
        camera.release();
        camera.connect()?;
        camera.release();
        camera.release();
        assert!(camera.next_frame().is_err());
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_requires_feature() {
        let config = CameraConfig {
            device: "/dev/video0".to_string(),
            ..CameraConfig::default()
        };
        assert!(V4l2Camera::new(config).is_err());
    }
}
