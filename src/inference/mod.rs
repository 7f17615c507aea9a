//! Autonomous steering.
//!
//! Each tick the `InferenceBridge` captures a frame, preprocesses it, runs the
//! model once and reads `(speed, angle)` out of the two-element result. The
//! command goes straight to the actuation sink; autonomous driving has no
//! notion of discrete events.
//!
//! A malformed output is a `ModelFault`. It is never replaced with a default
//! command.

pub mod backends;
pub mod preprocess;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::camera::FrameSource;
use crate::motion::{MotionLimits, MotionState};

pub use backends::ConstantModel;
#[cfg(feature = "backend-tract")]
pub use backends::TractModel;
pub use preprocess::{preprocess, ModelInput, PreprocessConfig};

/// Steering model collaborator.
pub trait SteeringModel {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one preprocessed frame.
    fn predict(&mut self, input: &ModelInput) -> Result<Vec<f32>>;
}

impl<M: SteeringModel + ?Sized> SteeringModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn predict(&mut self, input: &ModelInput) -> Result<Vec<f32>> {
        (**self).predict(input)
    }
}

/// Model output that cannot be turned into a command.
#[derive(Debug)]
pub struct ModelFault {
    pub detail: String,
}

impl ModelFault {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ModelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed model output: {}", self.detail)
    }
}

impl std::error::Error for ModelFault {}

/// Order of the two values the model emits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputOrder {
    #[default]
    SpeedAngle,
    AngleSpeed,
}

impl OutputOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputOrder::SpeedAngle => "speed_angle",
            OutputOrder::AngleSpeed => "angle_speed",
        }
    }

    /// Read a command out of raw model output.
    pub fn interpret(self, output: &[f32]) -> Result<MotionState> {
        let [first, second] = output else {
            return Err(anyhow::Error::new(ModelFault::new(format!(
                "expected 2 values, got {}",
                output.len()
            ))));
        };
        if !first.is_finite() || !second.is_finite() {
            return Err(anyhow::Error::new(ModelFault::new(format!(
                "non-finite values [{}, {}]",
                first, second
            ))));
        }
        Ok(match self {
            OutputOrder::SpeedAngle => MotionState::new(*first, *second),
            OutputOrder::AngleSpeed => MotionState::new(*second, *first),
        })
    }
}

impl fmt::Display for OutputOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "speed_angle" => Ok(OutputOrder::SpeedAngle),
            "angle_speed" => Ok(OutputOrder::AngleSpeed),
            other => Err(anyhow!(
                "unknown output order {:?} (expected speed_angle or angle_speed)",
                other
            )),
        }
    }
}

/// Camera -> preprocessing -> model -> command, once per tick.
pub struct InferenceBridge {
    preprocess: PreprocessConfig,
    order: OutputOrder,
    limits: MotionLimits,
    inferences: u64,
}

impl InferenceBridge {
    pub fn new(preprocess: PreprocessConfig, order: OutputOrder, limits: MotionLimits) -> Self {
        Self {
            preprocess,
            order,
            limits,
            inferences: 0,
        }
    }

    pub fn order(&self) -> OutputOrder {
        self.order
    }

    pub fn inferences(&self) -> u64 {
        self.inferences
    }

    /// Produce this tick's command.
    ///
    /// Capture errors come back untouched so the caller can classify them.
    /// The command is saturated to the motion limits.
    pub fn step(
        &mut self,
        camera: &mut dyn FrameSource,
        model: &mut dyn SteeringModel,
    ) -> Result<MotionState> {
        let frame = camera.next_frame()?;
        let input = preprocess(&frame, &self.preprocess).context("preprocess frame")?;
        let output = model
            .predict(&input)
            .map_err(|err| anyhow::Error::new(ModelFault::new(format!("{:#}", err))))?;
        let command = self.order.interpret(&output)?;
        self.inferences += 1;
        log::trace!("{}: {:?} -> {}", model.name(), output, command);
        Ok(MotionState::new(
            command
                .speed
                .clamp(-self.limits.max_speed, self.limits.max_speed),
            command
                .angle
                .clamp(-self.limits.max_angle, self.limits.max_angle),
        ))
    }
}
