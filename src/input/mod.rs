//! Operator input.
//!
//! Samplers report the raw boolean state of each control event once per tick.
//! The `EdgeDetector` turns those samples into fire/no-fire decisions so that
//! a held key does not re-trigger its action every tick.
//!
//! Available samplers:
//! - `TerminalSampler`: keyboard over a raw-mode terminal (crossterm)
//! - `ScriptedSampler`: a fixed per-tick script (tests, replay)

mod edge;
pub mod terminal;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub use edge::{DebouncePolicy, EdgeDetector};
pub use terminal::TerminalSampler;

/// A discrete operator control. The set is closed and fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEvent {
    SteerRight,
    SteerLeft,
    Accelerate,
    Decelerate,
    ToggleRecord,
    Stop,
    Quit,
    Go,
}

impl ControlEvent {
    /// All events in sampling order.
    pub const ALL: [ControlEvent; 8] = [
        ControlEvent::SteerRight,
        ControlEvent::SteerLeft,
        ControlEvent::Accelerate,
        ControlEvent::Decelerate,
        ControlEvent::ToggleRecord,
        ControlEvent::Stop,
        ControlEvent::Quit,
        ControlEvent::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlEvent::SteerRight => "steer_right",
            ControlEvent::SteerLeft => "steer_left",
            ControlEvent::Accelerate => "accelerate",
            ControlEvent::Decelerate => "decelerate",
            ControlEvent::ToggleRecord => "toggle_record",
            ControlEvent::Stop => "stop",
            ControlEvent::Quit => "quit",
            ControlEvent::Go => "go",
        }
    }

    /// Keyboard name used by the data-collection controls (`UP`, `r`, ...).
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name {
            "RIGHT" => Some(ControlEvent::SteerRight),
            "LEFT" => Some(ControlEvent::SteerLeft),
            "UP" => Some(ControlEvent::Accelerate),
            "DOWN" => Some(ControlEvent::Decelerate),
            "r" => Some(ControlEvent::ToggleRecord),
            "s" => Some(ControlEvent::Stop),
            "k" => Some(ControlEvent::Quit),
            "g" => Some(ControlEvent::Go),
            _ => None,
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ControlEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .or_else(|| ControlEvent::from_key_name(s))
            .ok_or_else(|| anyhow!("unknown control event '{}'", s))
    }
}

/// Source of raw per-tick control samples.
pub trait InputSampler {
    /// Refresh device state. Called once at the top of every tick.
    fn poll(&mut self) -> Result<()>;

    /// Current boolean state of `event` for this tick.
    fn sample(&mut self, event: ControlEvent) -> bool;

    /// Give the input device back. Must tolerate repeated calls.
    fn release(&mut self) {}
}

/// Sampler that replays a fixed script, one entry per tick.
///
/// Each entry lists the events held during that tick. Once the script runs
/// out every event reads as released.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    ticks: VecDeque<Vec<ControlEvent>>,
    current: Vec<ControlEvent>,
}

impl ScriptedSampler {
    pub fn new<I>(ticks: I) -> Self
    where
        I: IntoIterator<Item = Vec<ControlEvent>>,
    {
        Self {
            ticks: ticks.into_iter().collect(),
            current: Vec::new(),
        }
    }

    /// Build a script from key names, one key (or `""` for none) per tick.
    pub fn from_keys(keys: &[&str]) -> Result<Self> {
        let mut ticks = Vec::with_capacity(keys.len());
        for key in keys {
            if key.is_empty() {
                ticks.push(Vec::new());
            } else {
                ticks.push(vec![key.parse::<ControlEvent>()?]);
            }
        }
        Ok(Self::new(ticks))
    }

    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }
}

impl InputSampler for ScriptedSampler {
    fn poll(&mut self) -> Result<()> {
        self.current = self.ticks.pop_front().unwrap_or_default();
        Ok(())
    }

    fn sample(&mut self, event: ControlEvent) -> bool {
        self.current.contains(&event)
    }
}
