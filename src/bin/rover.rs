//! rover - drive the rover by keyboard (recording training data) or by model

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rover_kernel::actuation::transport::format_record;
use rover_kernel::actuation::{link_check, MemoryActuator, SerialTransport, SysfsActuator, Transport};
use rover_kernel::inference::ConstantModel;
#[cfg(feature = "backend-tract")]
use rover_kernel::inference::TractModel;
use rover_kernel::input::TerminalSampler;
use rover_kernel::recording::JpegFrameWriter;
use rover_kernel::{
    ActuationBackend, ActuationSink, Components, ControlEvent, ControlLoop, DebouncePolicy,
    DifferentialSink, EdgeDetector, FrameSource, InferenceBridge, InputSampler, MemoryTransport,
    Mode, MotionController, MotionState, RecordingSession, RoverConfig, ScriptedSampler, SteeringModel,
    TransportSink, V4l2Camera,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Defaults to $ROVER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// manual or autonomous.
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,
    /// Directory that receives img<N> recording sessions.
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Camera device, or stub://name for synthetic frames.
    #[arg(long)]
    camera: Option<String>,
    /// Replace the motor/UART output with an in-memory sink.
    #[arg(long)]
    dry_run: bool,
    /// Replay comma-separated keys (one per tick, empty for none) instead of
    /// reading the keyboard, e.g. "UP,UP,r,,r,k".
    #[arg(long, value_name = "KEYS")]
    script: Option<String>,
    /// Send a stopped command over the serial link, print the reply and exit.
    #[arg(long)]
    link_check: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RoverConfig::load_from(Some(path.as_path()))?,
        None => RoverConfig::load()?,
    };
    if let Some(mode) = &args.mode {
        config.mode = mode.parse::<Mode>()?;
    }
    if let Some(root) = &args.data_root {
        config.data_root = root.clone();
    }
    if let Some(device) = &args.camera {
        config.camera.device = device.clone();
    }
    config.validate()?;

    if args.link_check {
        return check_link(&config);
    }

    log::info!(
        "rover {} starting: mode={} data_root={} camera={} actuation={:?}{}",
        env!("CARGO_PKG_VERSION"),
        config.mode,
        config.data_root.display(),
        config.camera.device,
        config.actuation.backend,
        if args.dry_run { " (dry run)" } else { "" }
    );
    match config.motion.debounce {
        DebouncePolicy::RisingEdge => log::info!("debounce: rising edge (held controls act once)"),
        DebouncePolicy::Repeat => log::warn!("debounce: repeat (held controls act every tick)"),
    }

    let model = match config.mode {
        Mode::Autonomous => {
            log::info!("model output order: {}", config.model.output_order);
            Some(load_model(&config, args.dry_run)?)
        }
        Mode::Manual => None,
    };

    let mut camera = V4l2Camera::new(config.camera_config())?;
    camera.connect()?;
    let sink = match open_sink(&config, args.dry_run) {
        Ok(sink) => sink,
        Err(err) => {
            camera.release();
            return Err(err);
        }
    };

    let sampler: Box<dyn InputSampler> = match &args.script {
        Some(script) => {
            let keys: Vec<&str> = script.split(',').map(str::trim).collect();
            Box::new(ScriptedSampler::from_keys(&keys)?)
        }
        None => {
            let mut terminal = TerminalSampler::default();
            terminal.connect()?;
            Box::new(terminal)
        }
    };

    let components = Components {
        sampler,
        edges: EdgeDetector::new(&ControlEvent::ALL, config.motion.debounce),
        motion: MotionController::new(config.command_table(), config.motion_limits()),
        sink,
        camera: Box::new(camera),
        session: RecordingSession::new(
            &config.data_root,
            config.dir_offset,
            Box::new(JpegFrameWriter::new()),
        ),
    };
    let mut control = ControlLoop::new(config.loop_config(), components);
    if let Some(model) = model {
        let bridge = InferenceBridge::new(
            config.preprocess_config(),
            config.model.output_order,
            config.motion_limits(),
        );
        control = control.with_autonomy(bridge, model);
    }

    let shutdown = control.shutdown_flag();
    ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
        .expect("error setting Ctrl-C handler");

    let stats = control.run()?;
    log::info!(
        "rover stopped: {} ticks, {} frames in {} sessions ({} aborted)",
        stats.ticks,
        stats.frames_recorded,
        stats.sessions_completed,
        stats.sessions_aborted
    );
    Ok(())
}

fn check_link(config: &RoverConfig) -> Result<()> {
    let mut transport =
        SerialTransport::open(&config.actuation.serial_port, config.actuation.baud_rate)?;
    let record = format_record(MotionState::STOPPED);
    match link_check(&mut transport, &record, Duration::from_secs(2))? {
        Some(reply) => log::info!("link check: sent {:?}, received {:?}", record, reply),
        None => log::warn!("link check: sent {:?}, no reply within 2 s", record),
    }
    transport.close();
    Ok(())
}

fn open_sink(config: &RoverConfig, dry_run: bool) -> Result<Box<dyn ActuationSink>> {
    let actuation = &config.actuation;
    let sink: Box<dyn ActuationSink> = match (actuation.backend, dry_run) {
        (ActuationBackend::Serial, true) => {
            Box::new(TransportSink::new(MemoryTransport::new("dry-run")))
        }
        (ActuationBackend::Gpio, true) => {
            Box::new(DifferentialSink::new(MemoryActuator::new(), actuation.mixer))
        }
        (ActuationBackend::Serial, false) => Box::new(TransportSink::new(SerialTransport::open(
            &actuation.serial_port,
            actuation.baud_rate,
        )?)),
        (ActuationBackend::Gpio, false) => Box::new(DifferentialSink::new(
            SysfsActuator::open(actuation.gpio.clone())?,
            actuation.mixer,
        )),
    };
    Ok(sink)
}

fn load_model(config: &RoverConfig, dry_run: bool) -> Result<Box<dyn SteeringModel>> {
    match &config.model.path {
        None if dry_run => {
            log::warn!("no model configured; dry run uses a constant (0, 0) model");
            Ok(Box::new(ConstantModel::default()))
        }
        None => Err(anyhow!(
            "autonomous mode needs a model (model.path or ROVER_MODEL_PATH)"
        )),
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(TractModel::new(
            path,
            config.model.input_width,
            config.model.input_height,
        )?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow!(
            "loading {} requires the backend-tract feature",
            path.display()
        )),
    }
}
