use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuation::serial::SUPPORTED_BAUD_RATES;
use crate::actuation::{MixerConfig, SysfsLayout};
use crate::camera::CameraConfig;
use crate::control::{LoopConfig, Mode};
use crate::frame::Roi;
use crate::inference::preprocess::{DEFAULT_INPUT_HEIGHT, DEFAULT_INPUT_WIDTH};
use crate::inference::{OutputOrder, PreprocessConfig};
use crate::input::DebouncePolicy;
use crate::motion::{CommandTable, MotionLimits};

const DEFAULT_DATA_ROOT: &str = "DataCollected";
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_STEP: f32 = 0.1;
const DEFAULT_CRUISE_SPEED: f32 = 0.5;
const DEFAULT_MAX_SPEED: f32 = 1.0;
const DEFAULT_MAX_ANGLE: f32 = 1.0;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 240;
const DEFAULT_CAMERA_HEIGHT: u32 = 120;
const DEFAULT_CAMERA_FPS: u32 = 20;
const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const DEFAULT_ROI: Roi = Roi {
    x: 0.0,
    y: 0.2,
    width: 0.8,
    height: 0.8,
};
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS0";
const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Deserialize, Default)]
struct RoverConfigFile {
    data_root: Option<PathBuf>,
    dir_offset: Option<u32>,
    mode: Option<Mode>,
    tick_interval_ms: Option<u64>,
    motion: Option<MotionConfigFile>,
    camera: Option<CameraConfigFile>,
    actuation: Option<ActuationConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    step: Option<f32>,
    cruise_speed: Option<f32>,
    max_speed: Option<f32>,
    max_angle: Option<f32>,
    debounce: Option<DebouncePolicy>,
    center_steering: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    timeout_ms: Option<u64>,
    roi: Option<Roi>,
    /// `false` disables cropping at capture time.
    crop_to_roi: Option<bool>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ActuationConfigFile {
    backend: Option<ActuationBackend>,
    serial: Option<SerialConfigFile>,
    gpio: Option<GpioConfigFile>,
    max_duty: Option<f32>,
    turn_gain: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct GpioConfigFile {
    root: Option<PathBuf>,
    pwm_chip: Option<u32>,
    left_channel: Option<u32>,
    right_channel: Option<u32>,
    left_pins: Option<[u32; 2]>,
    right_pins: Option<[u32; 2]>,
    period_ns: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    output_order: Option<OutputOrder>,
    crop: Option<Roi>,
}

/// Which actuation sink drives the rover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationBackend {
    /// `"<speed>,<angle>"` records over a UART.
    #[default]
    Serial,
    /// Duty cycles straight to the motor driver through sysfs.
    Gpio,
}

#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub data_root: PathBuf,
    pub dir_offset: u32,
    pub mode: Mode,
    pub tick_interval: Duration,
    pub motion: MotionSettings,
    pub camera: CameraSettings,
    pub actuation: ActuationSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub step: f32,
    pub cruise_speed: f32,
    pub max_speed: f32,
    pub max_angle: f32,
    pub debounce: DebouncePolicy,
    pub center_steering: bool,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub timeout: Duration,
    pub roi: Option<Roi>,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct ActuationSettings {
    pub backend: ActuationBackend,
    pub serial_port: String,
    pub baud_rate: u32,
    pub gpio: SysfsLayout,
    pub mixer: MixerConfig,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub output_order: OutputOrder,
    pub crop: Option<Roi>,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self::from_file(RoverConfigFile::default())
    }
}

impl RoverConfig {
    /// Defaults, then the file named by `ROVER_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = env_value("ROVER_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of `ROVER_CONFIG`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RoverConfigFile) -> Self {
        let motion = file.motion.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let actuation = file.actuation.unwrap_or_default();
        let serial = actuation.serial.unwrap_or_default();
        let gpio = actuation.gpio.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let default_layout = SysfsLayout::default();
        let default_mixer = MixerConfig::default();

        let roi = if camera.crop_to_roi == Some(false) {
            None
        } else {
            Some(camera.roi.unwrap_or(DEFAULT_ROI))
        };

        Self {
            data_root: file
                .data_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
            dir_offset: file.dir_offset.unwrap_or(0),
            mode: file.mode.unwrap_or_default(),
            tick_interval: Duration::from_millis(
                file.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
            motion: MotionSettings {
                step: motion.step.unwrap_or(DEFAULT_STEP),
                cruise_speed: motion.cruise_speed.unwrap_or(DEFAULT_CRUISE_SPEED),
                max_speed: motion.max_speed.unwrap_or(DEFAULT_MAX_SPEED),
                max_angle: motion.max_angle.unwrap_or(DEFAULT_MAX_ANGLE),
                debounce: motion.debounce.unwrap_or_default(),
                center_steering: motion.center_steering.unwrap_or(false),
            },
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                timeout: Duration::from_millis(
                    camera.timeout_ms.unwrap_or(DEFAULT_CAMERA_TIMEOUT_MS),
                ),
                roi,
                max_consecutive_failures: camera
                    .max_consecutive_failures
                    .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            },
            actuation: ActuationSettings {
                backend: actuation.backend.unwrap_or_default(),
                serial_port: serial
                    .port
                    .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
                baud_rate: serial.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                gpio: SysfsLayout {
                    root: gpio.root.unwrap_or(default_layout.root),
                    pwm_chip: gpio.pwm_chip.unwrap_or(default_layout.pwm_chip),
                    left_channel: gpio.left_channel.unwrap_or(default_layout.left_channel),
                    right_channel: gpio.right_channel.unwrap_or(default_layout.right_channel),
                    left_pins: gpio
                        .left_pins
                        .map(|[a, b]| (a, b))
                        .unwrap_or(default_layout.left_pins),
                    right_pins: gpio
                        .right_pins
                        .map(|[a, b]| (a, b))
                        .unwrap_or(default_layout.right_pins),
                    period_ns: gpio.period_ns.unwrap_or(default_layout.period_ns),
                },
                mixer: MixerConfig {
                    max_duty: actuation.max_duty.unwrap_or(default_mixer.max_duty),
                    turn_gain: actuation.turn_gain.unwrap_or(default_mixer.turn_gain),
                },
            },
            model: ModelSettings {
                path: model.path,
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_WIDTH),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT),
                output_order: model.output_order.unwrap_or_default(),
                crop: model.crop,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(root) = env_value("ROVER_DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Some(mode) = env_value("ROVER_MODE") {
            self.mode = mode
                .parse::<Mode>()
                .map_err(|e| anyhow!("ROVER_MODE: {}", e))?;
        }
        if let Some(port) = env_value("ROVER_SERIAL_PORT") {
            self.actuation.serial_port = port;
        }
        if let Some(baud) = env_value("ROVER_BAUD_RATE") {
            self.actuation.baud_rate = baud
                .parse::<u32>()
                .map_err(|_| anyhow!("ROVER_BAUD_RATE must be an integer baud rate"))?;
        }
        if let Some(device) = env_value("ROVER_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(path) = env_value("ROVER_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(order) = env_value("ROVER_OUTPUT_ORDER") {
            self.model.output_order = order
                .parse::<OutputOrder>()
                .map_err(|e| anyhow!("ROVER_OUTPUT_ORDER: {}", e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let motion = &self.motion;
        if !(motion.step.is_finite() && motion.step > 0.0) {
            return Err(anyhow!("motion.step must be greater than zero"));
        }
        if !(motion.max_speed.is_finite() && motion.max_speed > 0.0) {
            return Err(anyhow!("motion.max_speed must be greater than zero"));
        }
        if !(motion.max_angle.is_finite() && motion.max_angle > 0.0) {
            return Err(anyhow!("motion.max_angle must be greater than zero"));
        }
        if !(motion.cruise_speed > 0.0 && motion.cruise_speed <= motion.max_speed) {
            return Err(anyhow!(
                "motion.cruise_speed must lie in (0, {}]",
                motion.max_speed
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera size must be non-zero"));
        }
        if self.camera.timeout.is_zero() {
            return Err(anyhow!("camera.timeout_ms must be greater than zero"));
        }
        if self.camera.max_consecutive_failures == 0 {
            return Err(anyhow!(
                "camera.max_consecutive_failures must be at least 1"
            ));
        }
        if let Some(roi) = &self.camera.roi {
            roi.validate()?;
        }
        if let Some(crop) = &self.model.crop {
            crop.validate()?;
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.actuation.baud_rate) {
            return Err(anyhow!(
                "unsupported baud rate {} (supported: {:?})",
                self.actuation.baud_rate,
                SUPPORTED_BAUD_RATES
            ));
        }
        let mixer = &self.actuation.mixer;
        if !(mixer.max_duty > 0.0 && mixer.max_duty <= 1.0) {
            return Err(anyhow!("actuation.max_duty must lie in (0, 1]"));
        }
        if !(mixer.turn_gain.is_finite() && mixer.turn_gain >= 0.0) {
            return Err(anyhow!("actuation.turn_gain must be non-negative"));
        }
        Ok(())
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device: self.camera.device.clone(),
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
            timeout: self.camera.timeout,
            roi: self.camera.roi,
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            mode: self.mode,
            tick_interval: self.tick_interval,
            center_steering: self.motion.center_steering,
            max_consecutive_failures: self.camera.max_consecutive_failures,
            ..LoopConfig::default()
        }
    }

    pub fn command_table(&self) -> CommandTable {
        CommandTable::standard(self.motion.step, self.motion.cruise_speed)
    }

    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            max_speed: self.motion.max_speed,
            max_angle: self.motion.max_angle,
        }
    }

    pub fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            crop: self.model.crop,
            input_width: self.model.input_width,
            input_height: self.model.input_height,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RoverConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
