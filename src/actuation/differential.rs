use anyhow::Result;

use super::ActuationSink;
use crate::motion::MotionState;

/// Wheel rotation direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Duty cycles (in `[0, max_duty]`) and directions for both wheels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveCommand {
    pub left_duty: f32,
    pub right_duty: f32,
    pub left_dir: Direction,
    pub right_dir: Direction,
}

impl DriveCommand {
    pub const IDLE: DriveCommand = DriveCommand {
        left_duty: 0.0,
        right_duty: 0.0,
        left_dir: Direction::Forward,
        right_dir: Direction::Forward,
    };
}

/// Parameters of the speed/angle -> duty mixer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixerConfig {
    /// Duty cycle at full speed, in `(0, 1]`.
    pub max_duty: f32,
    /// Fraction of `max_duty` added/removed per unit of angle.
    pub turn_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            max_duty: 1.0,
            turn_gain: 0.7,
        }
    }
}

/// Differential-drive mix.
///
/// Base duty comes from `|speed|` (saturating at 1), both wheels take the
/// direction of `sign(speed)`, and a positive angle speeds the left wheel up
/// and slows the right wheel down. Each duty is clamped to `[0, max_duty]`.
pub fn mix(state: MotionState, config: &MixerConfig) -> DriveCommand {
    let max_duty = config.max_duty;
    let base = state.speed.abs().min(1.0) * max_duty;
    let bias = state.angle * config.turn_gain * max_duty;
    let direction = if state.speed < 0.0 {
        Direction::Reverse
    } else {
        Direction::Forward
    };
    DriveCommand {
        left_duty: (base + bias).clamp(0.0, max_duty),
        right_duty: (base - bias).clamp(0.0, max_duty),
        left_dir: direction,
        right_dir: direction,
    }
}

/// Dual-motor driver collaborator.
pub trait Actuator {
    fn name(&self) -> &str;

    fn drive(&mut self, command: &DriveCommand) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Relinquish the hardware. Must be safe before any `drive`, and repeatable.
    fn release(&mut self) -> Result<()>;
}

/// Drives an `Actuator` directly from motion commands.
pub struct DifferentialSink<A: Actuator> {
    actuator: A,
    mixer: MixerConfig,
    last: Option<DriveCommand>,
    released: bool,
}

impl<A: Actuator> DifferentialSink<A> {
    pub fn new(actuator: A, mixer: MixerConfig) -> Self {
        Self {
            actuator,
            mixer,
            last: None,
            released: false,
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Last command handed to the actuator, if any.
    pub fn last_command(&self) -> Option<DriveCommand> {
        self.last
    }
}

impl<A: Actuator> ActuationSink for DifferentialSink<A> {
    fn name(&self) -> &'static str {
        "differential"
    }

    fn send(&mut self, state: MotionState) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let command = mix(state, &self.mixer);
        self.actuator.drive(&command)?;
        self.last = Some(command);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.actuator.stop()?;
        self.last = Some(DriveCommand::IDLE);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.actuator.release()
    }
}

/// Actuator that records commands in memory (tests, dry runs).
#[derive(Debug, Default)]
pub struct MemoryActuator {
    pub commands: Vec<DriveCommand>,
    pub stops: u32,
    pub releases: u32,
}

impl MemoryActuator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actuator for MemoryActuator {
    fn name(&self) -> &str {
        "memory"
    }

    fn drive(&mut self, command: &DriveCommand) -> Result<()> {
        log::trace!("MemoryActuator: {:?}", command);
        self.commands.push(*command);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stops += 1;
        self.commands.push(DriveCommand::IDLE);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.releases += 1;
        Ok(())
    }
}
