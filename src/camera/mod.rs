//! Camera collaborators.
//!
//! Every camera implements `FrameSource`:
//! - `connect` opens the device and fixes the region of interest
//! - `next_frame` blocks for at most the configured timeout
//! - `release` gives the device back; it is safe to call more than once
//!
//! Backends:
//! - `stub://` paths: synthetic frames, always available
//! - V4L2 device nodes (feature: ingest-v4l2)
//!
//! Capture failures are reported as a `CameraFault` inside the returned
//! `anyhow::Error` so the control loop can tell a dropped frame from a dead
//! device.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod v4l2;

use std::fmt;
use std::time::Duration;

use anyhow::Result;

use crate::frame::{Frame, Roi};

pub use v4l2::{V4l2Camera, V4l2Stats};

/// Camera settings.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or "stub://name" for synthetic frames.
    pub device: String,
    /// Requested capture width.
    pub width: u32,
    /// Requested capture height.
    pub height: u32,
    /// Target frame rate.
    pub target_fps: u32,
    /// Upper bound on a single blocking capture.
    pub timeout: Duration,
    /// Sub-rectangle kept from every captured frame.
    pub roi: Option<Roi>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 240,
            height: 120,
            target_fps: 20,
            timeout: Duration::from_secs(2),
            roi: None,
        }
    }
}

/// How a capture failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraFaultKind {
    /// No frame within the capture timeout.
    Timeout,
    /// The device returned an empty or malformed buffer.
    Empty,
    /// The device is gone or was never opened.
    Device,
}

/// Typed capture failure carried inside `anyhow::Error`.
#[derive(Debug)]
pub struct CameraFault {
    pub kind: CameraFaultKind,
    pub detail: String,
}

impl CameraFault {
    pub fn new(kind: CameraFaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Transient faults may clear on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, CameraFaultKind::Timeout | CameraFaultKind::Empty)
    }

    /// Classify an arbitrary capture error. Untyped errors count as device
    /// failures.
    pub fn classify(err: &anyhow::Error) -> CameraFaultKind {
        err.downcast_ref::<CameraFault>()
            .map(|fault| fault.kind)
            .unwrap_or(CameraFaultKind::Device)
    }
}

impl fmt::Display for CameraFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CameraFaultKind::Timeout => "capture timed out",
            CameraFaultKind::Empty => "empty frame",
            CameraFaultKind::Device => "camera device failure",
        };
        write!(f, "{}: {}", kind, self.detail)
    }
}

impl std::error::Error for CameraFault {}

/// Camera collaborator interface.
pub trait FrameSource {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Open the device.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame, cropped to the configured region of interest.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device. Must tolerate repeated calls.
    fn release(&mut self);
}
