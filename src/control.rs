//! The control loop.
//!
//! One tick, always in this order:
//! 1. stop if a shutdown was requested (Ctrl-C) before this tick
//! 2. poll the sampler and run edge detection
//! 3. apply fired events to the motion state, in sampling order
//! 4. manual: send the command, then advance the recording session
//!    autonomous: run the inference bridge, then send its command
//! 5. stop if `quit` fired this tick
//!
//! Shutdown stops the sink, flushes an open recording session, releases the
//! sink and finally the camera. It runs once, on quit, on a fatal error, or
//! when the loop is dropped.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::actuation::ActuationSink;
use crate::camera::{CameraFault, FrameSource};
use crate::inference::{InferenceBridge, SteeringModel};
use crate::input::{EdgeDetector, InputSampler};
use crate::motion::{Counter, MotionController, MotionState};
use crate::recording::{RecordingSession, SessionTick};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Operator drives, optionally recording training data.
    #[default]
    Manual,
    /// The steering model drives.
    Autonomous,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Mode::Manual),
            "autonomous" | "auto" => Ok(Mode::Autonomous),
            other => Err(anyhow!(
                "unknown mode {:?} (expected manual or autonomous)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub mode: Mode,
    /// Minimum tick period. Zero runs ticks back to back.
    pub tick_interval: Duration,
    /// Zero the steering angle at the start of every tick.
    pub center_steering: bool,
    /// Consecutive transient capture failures tolerated before giving up.
    pub max_consecutive_failures: u32,
    pub health_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Manual,
            tick_interval: Duration::from_millis(50),
            center_steering: false,
            max_consecutive_failures: 5,
            health_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Quit,
}

/// Counters reported in health lines and at shutdown.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames_recorded: u64,
    pub capture_failures: u64,
    pub sessions_completed: u32,
    pub sessions_aborted: u32,
    pub inferences: u64,
    pub last_command: MotionState,
}

/// Everything the loop drives, already acquired.
pub struct Components<S: ActuationSink> {
    pub sampler: Box<dyn InputSampler>,
    pub edges: EdgeDetector,
    pub motion: MotionController,
    pub sink: S,
    pub camera: Box<dyn FrameSource>,
    pub session: RecordingSession,
}

struct Autonomy {
    bridge: InferenceBridge,
    model: Box<dyn SteeringModel>,
}

pub struct ControlLoop<S: ActuationSink> {
    config: LoopConfig,
    sampler: Box<dyn InputSampler>,
    edges: EdgeDetector,
    motion: MotionController,
    sink: S,
    camera: Box<dyn FrameSource>,
    session: RecordingSession,
    autonomy: Option<Autonomy>,
    shutdown_requested: Arc<AtomicBool>,
    stats: LoopStats,
    consecutive_failures: u32,
    last_health_log: Instant,
    finished: bool,
}

impl<S: ActuationSink> ControlLoop<S> {
    pub fn new(config: LoopConfig, components: Components<S>) -> Self {
        Self {
            config,
            sampler: components.sampler,
            edges: components.edges,
            motion: components.motion,
            sink: components.sink,
            camera: components.camera,
            session: components.session,
            autonomy: None,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            stats: LoopStats::default(),
            consecutive_failures: 0,
            last_health_log: Instant::now(),
            finished: false,
        }
    }

    /// Attach the model used in autonomous mode.
    pub fn with_autonomy(mut self, bridge: InferenceBridge, model: Box<dyn SteeringModel>) -> Self {
        self.autonomy = Some(Autonomy { bridge, model });
        self
    }

    /// Flag that ends the loop at the top of the next tick when set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_requested)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Tick until quit or a fatal error, then shut down.
    pub fn run(&mut self) -> Result<LoopStats> {
        if self.config.mode == Mode::Autonomous && self.autonomy.is_none() {
            self.shutdown()?;
            return Err(anyhow!("autonomous mode requires a steering model"));
        }
        log::info!(
            "ControlLoop: {} mode, sink={}, camera={}, debounce={:?}",
            self.config.mode,
            self.sink.name(),
            self.camera.name(),
            self.edges.policy()
        );

        let result = loop {
            let started = Instant::now();
            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Quit) => break Ok(()),
                Err(err) => break Err(err),
            }
            if let Some(rest) = self.config.tick_interval.checked_sub(started.elapsed()) {
                if !rest.is_zero() {
                    std::thread::sleep(rest);
                }
            }
        };

        if let Err(err) = &result {
            log::error!("ControlLoop: fatal: {:#}", err);
        }
        let shutdown = self.shutdown();
        result?;
        shutdown?;
        Ok(self.stats.clone())
    }

    /// Run one tick.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            log::info!("ControlLoop: shutdown requested");
            return Ok(TickOutcome::Quit);
        }

        self.sampler.poll()?;
        let fired = self.edges.update(self.sampler.as_mut());

        if self.config.center_steering {
            self.motion.center_steering();
        }
        let toggles_before = self.motion.counter(Counter::Record);
        let quits_before = self.motion.counter(Counter::Terminate);
        for &event in &fired {
            let state = self.motion.apply(event);
            log::debug!("{} -> {}", event, state);
        }
        let toggle = self.motion.counter(Counter::Record) != toggles_before;
        let quit = self.motion.counter(Counter::Terminate) != quits_before;

        match self.config.mode {
            Mode::Manual => self.manual_step(toggle)?,
            Mode::Autonomous => self.autonomous_step()?,
        }

        self.stats.ticks += 1;
        if self.last_health_log.elapsed() >= self.config.health_interval {
            self.log_health();
            self.last_health_log = Instant::now();
        }

        if quit {
            log::info!("ControlLoop: quit");
            return Ok(TickOutcome::Quit);
        }
        Ok(TickOutcome::Continue)
    }

    fn manual_step(&mut self, toggle: bool) -> Result<()> {
        let state = self.motion.state();
        self.sink.send(state)?;
        self.stats.last_command = state;
        let report = self.session.tick(toggle, state, self.camera.as_mut());
        self.handle_session(report)
    }

    fn autonomous_step(&mut self) -> Result<()> {
        let autonomy = self
            .autonomy
            .as_mut()
            .ok_or_else(|| anyhow!("autonomous mode requires a steering model"))?;
        match autonomy
            .bridge
            .step(self.camera.as_mut(), autonomy.model.as_mut())
        {
            Ok(command) => {
                self.consecutive_failures = 0;
                self.stats.inferences += 1;
                self.sink.send(command)?;
                self.stats.last_command = command;
                Ok(())
            }
            Err(err) => self.capture_failed(err),
        }
    }

    fn handle_session(&mut self, report: SessionTick) -> Result<()> {
        if report.captured.is_some() {
            self.consecutive_failures = 0;
            self.stats.frames_recorded += 1;
        }
        self.count_session_outcome(&report);
        match report.capture_error {
            Some(err) => self.capture_failed(err),
            None => Ok(()),
        }
    }

    /// An aborted session still flushes its prefix but counts only as aborted.
    fn count_session_outcome(&mut self, report: &SessionTick) {
        if report.aborted.is_some() {
            self.stats.sessions_aborted += 1;
        } else if report.flushed.is_some() {
            self.stats.sessions_completed += 1;
        }
    }

    /// Transient camera faults are skipped until too many arrive in a row;
    /// anything else ends the loop.
    fn capture_failed(&mut self, err: anyhow::Error) -> Result<()> {
        let transient = err
            .downcast_ref::<CameraFault>()
            .map_or(false, CameraFault::is_transient);
        if !transient {
            return Err(err);
        }
        self.stats.capture_failures += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            return Err(err.context(format!(
                "{} consecutive capture failures",
                self.consecutive_failures
            )));
        }
        log::warn!(
            "capture failed ({}/{}), skipping tick: {:#}",
            self.consecutive_failures,
            self.config.max_consecutive_failures,
            err
        );
        Ok(())
    }

    fn log_health(&self) {
        log::info!(
            "health ticks={} frames={} capture_failures={} sessions={} command={}",
            self.stats.ticks,
            self.stats.frames_recorded,
            self.stats.capture_failures,
            self.stats.sessions_completed,
            self.stats.last_command
        );
    }

    /// Stop, flush, release. Runs at most once; later calls are no-ops.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let mut first_err = None;

        if let Err(err) = self.sink.stop() {
            log::error!("ControlLoop: stop failed: {:#}", err);
            first_err.get_or_insert(err);
        }
        self.motion.halt();
        self.stats.last_command = MotionState::STOPPED;

        let report = self.session.finish();
        self.count_session_outcome(&report);

        // Reverse order of acquisition: input, actuation, camera.
        self.sampler.release();
        if let Err(err) = self.sink.release() {
            log::error!("ControlLoop: release of {} failed: {:#}", self.sink.name(), err);
            first_err.get_or_insert(err);
        }
        self.camera.release();

        log::info!(
            "ControlLoop: stopped after {} ticks ({} frames, {} sessions, {} inferences)",
            self.stats.ticks,
            self.stats.frames_recorded,
            self.stats.sessions_completed,
            self.stats.inferences
        );
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<S: ActuationSink> Drop for ControlLoop<S> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("ControlLoop: shutdown on drop failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::{MemoryTransport, TransportSink};
    use crate::camera::{CameraConfig, CameraFaultKind, V4l2Camera};
    use crate::inference::{ConstantModel, OutputOrder, PreprocessConfig};
    use crate::input::{ControlEvent, DebouncePolicy, ScriptedSampler};
    use crate::motion::{CommandTable, MotionLimits};
    use crate::actuation::transport::Transport;
    use crate::recording::{read_log, JpegFrameWriter};
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    /// Camera that fails with a scripted fault on selected calls.
    struct FlakyCamera {
        inner: V4l2Camera,
        failures: Vec<Option<CameraFaultKind>>,
        calls: usize,
    }

    impl FrameSource for FlakyCamera {
        fn name(&self) -> &str {
            "flaky"
        }

        fn connect(&mut self) -> Result<()> {
            self.inner.connect()
        }

        fn next_frame(&mut self) -> Result<crate::frame::Frame> {
            let call = self.calls;
            self.calls += 1;
            match self.failures.get(call).copied().flatten() {
                Some(kind) => Err(anyhow::Error::new(CameraFault::new(kind, "scripted"))),
                None => self.inner.next_frame(),
            }
        }

        fn release(&mut self) {
            self.inner.release()
        }
    }

    fn stub_camera() -> V4l2Camera {
        let mut camera = V4l2Camera::new(CameraConfig {
            device: "stub://loop".to_string(),
            width: 24,
            height: 12,
            ..CameraConfig::default()
        })
        .unwrap();
        camera.connect().unwrap();
        camera
    }

    fn build(
        root: &Path,
        keys: &[&str],
        camera: Box<dyn FrameSource>,
        config: LoopConfig,
    ) -> ControlLoop<TransportSink<MemoryTransport>> {
        build_with(
            root,
            Box::new(ScriptedSampler::from_keys(keys).unwrap()),
            camera,
            MemoryTransport::new("memory"),
            config,
        )
    }

    fn build_with(
        root: &Path,
        sampler: Box<dyn InputSampler>,
        camera: Box<dyn FrameSource>,
        transport: MemoryTransport,
        config: LoopConfig,
    ) -> ControlLoop<TransportSink<MemoryTransport>> {
        let components = Components {
            sampler,
            edges: EdgeDetector::new(&ControlEvent::ALL, DebouncePolicy::RisingEdge),
            motion: MotionController::new(CommandTable::standard(0.1, 0.5), MotionLimits::default()),
            sink: TransportSink::new(transport),
            camera,
            session: RecordingSession::new(root, 0, Box::new(JpegFrameWriter::new())),
        };
        ControlLoop::new(
            LoopConfig {
                tick_interval: Duration::ZERO,
                ..config
            },
            components,
        )
    }

    type ReleaseLog = Rc<RefCell<Vec<&'static str>>>;

    struct LoggedSampler {
        inner: ScriptedSampler,
        log: ReleaseLog,
    }

    impl InputSampler for LoggedSampler {
        fn poll(&mut self) -> Result<()> {
            self.inner.poll()
        }

        fn sample(&mut self, event: ControlEvent) -> bool {
            self.inner.sample(event)
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("sampler");
        }
    }

    struct LoggedCamera {
        inner: V4l2Camera,
        log: ReleaseLog,
    }

    impl FrameSource for LoggedCamera {
        fn name(&self) -> &str {
            "logged"
        }

        fn connect(&mut self) -> Result<()> {
            self.inner.connect()
        }

        fn next_frame(&mut self) -> Result<crate::frame::Frame> {
            self.inner.next_frame()
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("camera");
            self.inner.release()
        }
    }

    #[test]
    fn quit_ends_the_loop_with_a_stop_record() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut control = build(
            tmp.path(),
            &["UP", "", "k"],
            Box::new(stub_camera()),
            LoopConfig::default(),
        );
        let stats = control.run()?;
        assert_eq!(stats.ticks, 3);
        let lines = control.sink().transport().lines();
        assert_eq!(lines.first().map(String::as_str), Some("0.1,0"));
        assert_eq!(lines.last().map(String::as_str), Some("stop"));
        assert_eq!(lines.len(), 4);
        Ok(())
    }

    #[test]
    fn shutdown_flag_stops_before_sampling() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut control = build(tmp.path(), &["UP"], Box::new(stub_camera()), LoopConfig::default());
        control.shutdown_flag().store(true, Ordering::SeqCst);
        let stats = control.run()?;
        assert_eq!(stats.ticks, 0);
        assert_eq!(control.sink().transport().lines(), vec!["stop".to_string()]);
        Ok(())
    }

    #[test]
    fn center_steering_resets_angle_each_tick() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config = LoopConfig {
            center_steering: true,
            ..LoopConfig::default()
        };
        let mut control = build(tmp.path(), &["RIGHT", ""], Box::new(stub_camera()), config);
        control.tick()?;
        assert_eq!(control.motion().state().angle, 0.1);
        control.tick()?;
        assert_eq!(control.motion().state().angle, 0.0);
        Ok(())
    }

    #[test]
    fn transient_capture_failures_escalate_after_limit() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let camera = FlakyCamera {
            inner: stub_camera(),
            failures: vec![None, Some(CameraFaultKind::Timeout), Some(CameraFaultKind::Timeout)],
            calls: 0,
        };
        let config = LoopConfig {
            max_consecutive_failures: 2,
            ..LoopConfig::default()
        };
        let mut control = build(tmp.path(), &["r", "", ""], Box::new(camera), config);

        assert_eq!(control.tick()?, TickOutcome::Continue);
        assert_eq!(control.tick()?, TickOutcome::Continue);
        assert_eq!(control.stats().capture_failures, 1);
        assert!(control.tick().is_err());

        control.shutdown()?;
        let log = tmp.path().join("img0/log_0.csv");
        assert_eq!(std::fs::read_to_string(log)?.lines().count(), 1);
        Ok(())
    }

    #[test]
    fn device_failure_is_fatal_and_still_flushes() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let camera = FlakyCamera {
            inner: stub_camera(),
            failures: vec![None, None, Some(CameraFaultKind::Device)],
            calls: 0,
        };
        let mut control = build(tmp.path(), &["r"], Box::new(camera), LoopConfig::default());
        assert!(control.run().is_err());
        assert_eq!(control.stats().sessions_completed, 1);
        assert_eq!(control.stats().frames_recorded, 2);
        assert_eq!(
            control.sink().transport().lines().last().map(String::as_str),
            Some("stop")
        );
        Ok(())
    }

    #[test]
    fn autonomous_mode_sends_model_commands() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config = LoopConfig {
            mode: Mode::Autonomous,
            ..LoopConfig::default()
        };
        let bridge = InferenceBridge::new(
            PreprocessConfig::default(),
            OutputOrder::SpeedAngle,
            MotionLimits::default(),
        );
        let mut control = build(tmp.path(), &["", "", "k"], Box::new(stub_camera()), config)
            .with_autonomy(bridge, Box::new(ConstantModel::new(vec![0.3, -0.5])));
        let stats = control.run()?;
        assert_eq!(stats.inferences, 3);
        let lines = control.sink().transport().lines();
        assert_eq!(lines, vec!["0.3,-0.5", "0.3,-0.5", "0.3,-0.5", "stop"]);
        assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn malformed_model_output_is_fatal() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config = LoopConfig {
            mode: Mode::Autonomous,
            ..LoopConfig::default()
        };
        let bridge = InferenceBridge::new(
            PreprocessConfig::default(),
            OutputOrder::SpeedAngle,
            MotionLimits::default(),
        );
        let mut control = build(tmp.path(), &[""], Box::new(stub_camera()), config)
            .with_autonomy(bridge, Box::new(ConstantModel::new(vec![0.3])));
        let err = control.run().unwrap_err();
        assert!(err.downcast_ref::<crate::inference::ModelFault>().is_some());
        assert_eq!(control.sink().transport().lines(), vec!["stop".to_string()]);
        Ok(())
    }

    #[test]
    fn autonomous_without_model_is_rejected() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config = LoopConfig {
            mode: Mode::Autonomous,
            ..LoopConfig::default()
        };
        let mut control = build(tmp.path(), &[], Box::new(stub_camera()), config);
        assert!(control.run().is_err());
        Ok(())
    }

    #[test]
    fn failed_transport_write_does_not_end_the_loop() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut transport = MemoryTransport::new("flaky-link");
        transport.fail_next_writes(1);
        let sampler = ScriptedSampler::from_keys(&["r", "", "", "r", "k"])?;
        let mut control = build_with(
            tmp.path(),
            Box::new(sampler),
            Box::new(stub_camera()),
            transport,
            LoopConfig::default(),
        );

        let stats = control.run()?;
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(control.sink().dropped(), 1);
        let lines = control.sink().transport().lines();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.last().map(String::as_str), Some("stop"));
        assert_eq!(read_log(&tmp.path().join("img0/log_0.csv"))?.len(), 3);
        Ok(())
    }

    #[test]
    fn aborted_session_is_not_counted_as_completed() -> Result<()> {
        struct BrokenWriter;

        impl crate::recording::FrameWriter for BrokenWriter {
            fn extension(&self) -> &'static str {
                "jpg"
            }

            fn write(&mut self, _frame: &crate::frame::Frame, _path: &Path) -> Result<()> {
                Err(anyhow!("no space left on device"))
            }
        }

        let tmp = tempfile::tempdir()?;
        let mut control = build(tmp.path(), &["r", "", "k"], Box::new(stub_camera()), LoopConfig::default());
        control.session = RecordingSession::new(tmp.path(), 0, Box::new(BrokenWriter));

        let stats = control.run()?;
        assert_eq!(stats.sessions_aborted, 1);
        assert_eq!(stats.sessions_completed, 0);
        assert_eq!(stats.frames_recorded, 0);
        Ok(())
    }

    #[test]
    fn shutdown_releases_input_before_camera() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let log = ReleaseLog::default();
        let sampler = LoggedSampler {
            inner: ScriptedSampler::from_keys(&["UP", "k"])?,
            log: log.clone(),
        };
        let camera = LoggedCamera {
            inner: stub_camera(),
            log: log.clone(),
        };
        let mut control = build_with(
            tmp.path(),
            Box::new(sampler),
            Box::new(camera),
            MemoryTransport::new("memory"),
            LoopConfig::default(),
        );
        control.run()?;
        control.shutdown()?;

        assert_eq!(*log.borrow(), vec!["sampler", "camera"]);
        assert!(!control.sink().transport().is_ready());
        Ok(())
    }

    #[test]
    fn mode_parses_common_spellings() -> Result<()> {
        assert_eq!("Manual".parse::<Mode>()?, Mode::Manual);
        assert_eq!("auto".parse::<Mode>()?, Mode::Autonomous);
        assert!("drive".parse::<Mode>().is_err());
        Ok(())
    }
}
