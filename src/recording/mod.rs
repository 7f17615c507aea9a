//! Recording sessions.
//!
//! A session pairs every captured frame with the motion command in effect
//! when it was taken. Lifecycle:
//!
//! ```text
//! Idle --toggle--> Starting --dir created--> Capturing --toggle--> Flushing --> Idle
//!                     |                                               ^
//!                     +------ dir creation failed --------> Idle      |
//! ```
//!
//! `Starting` and `Flushing` complete within the tick that entered them, so
//! between ticks a session is only ever `Idle` or `Capturing`. The three
//! parallel sequences (frame refs, speeds, angles) always have equal length.
//!
//! On disk, under the data root:
//! - `img<N>/image_<k>.jpg` for every captured frame
//! - `img<N>/log_<N>.csv` with one `img<N>/image_<k>.jpg,<speed>,<angle>` line per frame

pub mod frames;
pub mod layout;
pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::camera::FrameSource;
use crate::motion::MotionState;

pub use frames::{FrameWriter, JpegFrameWriter};
pub use layout::{allocate_session_dir, SessionDir};
pub use telemetry::{read_log, write_log, TelemetryRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Capturing,
    Flushing,
}

/// A completed, persisted session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub index: u32,
    pub directory: PathBuf,
    pub log_path: PathBuf,
    pub frames: usize,
}

/// What happened to the session during one tick.
#[derive(Debug, Default)]
pub struct SessionTick {
    /// A session directory was allocated this tick.
    pub started: Option<SessionDir>,
    /// Reference of the frame captured this tick.
    pub captured: Option<String>,
    /// The camera failed to deliver this tick's frame; nothing was appended.
    pub capture_error: Option<anyhow::Error>,
    /// The session was persisted this tick.
    pub flushed: Option<SessionSummary>,
    /// The session could not start or could not be persisted.
    pub aborted: Option<anyhow::Error>,
}

struct ActiveSession {
    dir: SessionDir,
    frame_index: u64,
    frame_refs: Vec<String>,
    speed_log: Vec<f32>,
    angle_log: Vec<f32>,
}

impl ActiveSession {
    fn new(dir: SessionDir) -> Self {
        Self {
            dir,
            frame_index: 0,
            frame_refs: Vec::new(),
            speed_log: Vec::new(),
            angle_log: Vec::new(),
        }
    }

    fn push(&mut self, frame_ref: String, motion: MotionState) {
        self.frame_refs.push(frame_ref);
        self.speed_log.push(motion.speed);
        self.angle_log.push(motion.angle);
        self.frame_index += 1;
    }

    fn records(&self) -> Vec<TelemetryRecord> {
        self.frame_refs
            .iter()
            .zip(&self.speed_log)
            .zip(&self.angle_log)
            .map(|((frame_ref, &speed), &angle)| TelemetryRecord {
                frame_ref: frame_ref.clone(),
                speed,
                angle,
            })
            .collect()
    }

    fn clear(&mut self) {
        self.frame_refs.clear();
        self.speed_log.clear();
        self.angle_log.clear();
    }
}

/// Session state machine bound to one data root.
pub struct RecordingSession {
    data_root: PathBuf,
    next_index: u32,
    writer: Box<dyn FrameWriter>,
    state: SessionState,
    active: Option<ActiveSession>,
    completed: u32,
}

impl RecordingSession {
    /// `first_index` is where directory numbering starts scanning.
    pub fn new(data_root: impl Into<PathBuf>, first_index: u32, writer: Box<dyn FrameWriter>) -> Self {
        Self {
            data_root: data_root.into(),
            next_index: first_index,
            writer,
            state: SessionState::Idle,
            active: None,
            completed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn is_capturing(&self) -> bool {
        self.state == SessionState::Capturing
    }

    /// Frames buffered in the current session.
    pub fn pending_frames(&self) -> usize {
        self.active.as_ref().map_or(0, |s| s.frame_refs.len())
    }

    /// Directory of the current session, if one is open.
    pub fn active_dir(&self) -> Option<&SessionDir> {
        self.active.as_ref().map(|s| &s.dir)
    }

    /// Sessions persisted since construction.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Advance one tick. `toggle` is the record-toggle edge for this tick and
    /// `motion` the command in effect while the frame is captured.
    pub fn tick(
        &mut self,
        toggle: bool,
        motion: MotionState,
        camera: &mut dyn FrameSource,
    ) -> SessionTick {
        let mut report = SessionTick::default();
        if toggle {
            match self.state {
                SessionState::Idle => self.state = SessionState::Starting,
                SessionState::Capturing => self.state = SessionState::Flushing,
                SessionState::Starting | SessionState::Flushing => {}
            }
        }
        if self.state == SessionState::Starting {
            self.start(&mut report);
        }
        match self.state {
            SessionState::Capturing => self.capture(motion, camera, &mut report),
            SessionState::Flushing => self.flush(&mut report),
            SessionState::Idle | SessionState::Starting => {}
        }
        report
    }

    /// Persist an open session as if recording had been toggled off.
    pub fn finish(&mut self) -> SessionTick {
        let mut report = SessionTick::default();
        if matches!(self.state, SessionState::Capturing | SessionState::Flushing) {
            self.state = SessionState::Flushing;
            self.flush(&mut report);
        }
        report
    }

    fn start(&mut self, report: &mut SessionTick) {
        match allocate_session_dir(&self.data_root, self.next_index) {
            Ok(dir) => {
                log::info!("recording started in {}", dir.path.display());
                self.next_index = dir.index.saturating_add(1);
                self.active = Some(ActiveSession::new(dir.clone()));
                self.state = SessionState::Capturing;
                report.started = Some(dir);
            }
            Err(err) => {
                log::error!("recording not started: {:#}", err);
                self.active = None;
                self.state = SessionState::Idle;
                report.aborted = Some(err);
            }
        }
    }

    fn capture(&mut self, motion: MotionState, camera: &mut dyn FrameSource, report: &mut SessionTick) {
        let Some(session) = self.active.as_mut() else {
            self.state = SessionState::Idle;
            return;
        };
        let frame = match camera.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                report.capture_error = Some(err);
                return;
            }
        };
        let file_name = format!("image_{}.{}", session.frame_index, self.writer.extension());
        let path = session.dir.path.join(&file_name);
        if let Err(err) = self.writer.write(&frame, &path) {
            log::error!("recording aborted, frame write failed: {:#}", err);
            report.aborted = Some(err);
            self.state = SessionState::Flushing;
            self.flush(report);
            return;
        }
        let frame_ref = format!("{}/{}", session.dir.name(), file_name);
        session.push(frame_ref.clone(), motion);
        log::trace!("captured {} at {}", frame_ref, motion);
        report.captured = Some(frame_ref);
    }

    fn flush(&mut self, report: &mut SessionTick) {
        self.state = SessionState::Idle;
        let Some(mut session) = self.active.take() else {
            return;
        };
        let log_path = session.dir.log_path();
        let records = session.records();
        session.clear();
        match write_log(&log_path, &records)
            .with_context(|| format!("flush session {}", session.dir.name()))
        {
            Ok(()) => {
                if report.aborted.is_none() {
                    self.completed += 1;
                }
                log::info!(
                    "recording stopped: {} frames logged to {}",
                    records.len(),
                    log_path.display()
                );
                report.flushed = Some(SessionSummary {
                    index: session.dir.index,
                    directory: session.dir.path.clone(),
                    log_path,
                    frames: records.len(),
                });
            }
            Err(err) => {
                log::error!("recording aborted: {:#}", err);
                if report.aborted.is_none() {
                    report.aborted = Some(err);
                }
            }
        }
    }
}
