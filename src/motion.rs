//! Persistent motion state and the event -> effect dispatch table.

use std::fmt;

use serde::Serialize;

use crate::input::ControlEvent;

/// Speed and steering angle currently commanded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MotionState {
    pub speed: f32,
    pub angle: f32,
}

impl MotionState {
    pub const STOPPED: MotionState = MotionState {
        speed: 0.0,
        angle: 0.0,
    };

    pub fn new(speed: f32, angle: f32) -> Self {
        Self { speed, angle }
    }

    pub fn is_stopped(&self) -> bool {
        self.speed == 0.0 && self.angle == 0.0
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.speed, self.angle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Speed,
    Angle,
}

/// Counters bumped by toggle events; they never touch motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    Record,
    Terminate,
}

/// What a fired control event does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Effect {
    Increment { axis: Axis, step: f32 },
    Set { speed: Option<f32>, angle: Option<f32> },
    Toggle(Counter),
}

/// Dispatch table from control event to effect.
#[derive(Clone, Debug, Default)]
pub struct CommandTable {
    entries: Vec<(ControlEvent, Effect)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `event` to `effect`, replacing any previous mapping.
    pub fn bind(mut self, event: ControlEvent, effect: Effect) -> Self {
        self.entries.retain(|(bound, _)| *bound != event);
        self.entries.push((event, effect));
        self
    }

    pub fn effect(&self, event: ControlEvent) -> Option<Effect> {
        self.entries
            .iter()
            .find(|(bound, _)| *bound == event)
            .map(|(_, effect)| *effect)
    }

    /// Standard keyboard layout: arrows trim speed/angle by `step`,
    /// `go` sets cruise speed, `stop` zeroes both, `r`/`k` toggle counters.
    pub fn standard(step: f32, cruise_speed: f32) -> Self {
        Self::new()
            .bind(
                ControlEvent::Accelerate,
                Effect::Increment {
                    axis: Axis::Speed,
                    step,
                },
            )
            .bind(
                ControlEvent::Decelerate,
                Effect::Increment {
                    axis: Axis::Speed,
                    step: -step,
                },
            )
            .bind(
                ControlEvent::SteerRight,
                Effect::Increment {
                    axis: Axis::Angle,
                    step,
                },
            )
            .bind(
                ControlEvent::SteerLeft,
                Effect::Increment {
                    axis: Axis::Angle,
                    step: -step,
                },
            )
            .bind(
                ControlEvent::Go,
                Effect::Set {
                    speed: Some(cruise_speed),
                    angle: None,
                },
            )
            .bind(
                ControlEvent::Stop,
                Effect::Set {
                    speed: Some(0.0),
                    angle: Some(0.0),
                },
            )
            .bind(ControlEvent::ToggleRecord, Effect::Toggle(Counter::Record))
            .bind(ControlEvent::Quit, Effect::Toggle(Counter::Terminate))
    }
}

/// Saturation bounds for the motion state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionLimits {
    pub max_speed: f32,
    pub max_angle: f32,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_speed: 1.0,
            max_angle: 1.0,
        }
    }
}

/// Owns the motion state and applies fired events to it.
#[derive(Clone, Debug)]
pub struct MotionController {
    table: CommandTable,
    limits: MotionLimits,
    state: MotionState,
    record_toggles: u32,
    terminate_requests: u32,
}

impl MotionController {
    pub fn new(table: CommandTable, limits: MotionLimits) -> Self {
        Self {
            table,
            limits,
            state: MotionState::STOPPED,
            record_toggles: 0,
            terminate_requests: 0,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn limits(&self) -> MotionLimits {
        self.limits
    }

    pub fn counter(&self, counter: Counter) -> u32 {
        match counter {
            Counter::Record => self.record_toggles,
            Counter::Terminate => self.terminate_requests,
        }
    }

    /// Apply one fired event. Unmapped events leave the state unchanged.
    pub fn apply(&mut self, event: ControlEvent) -> MotionState {
        let Some(effect) = self.table.effect(event) else {
            return self.state;
        };
        match effect {
            Effect::Increment { axis, step } => match axis {
                Axis::Speed => self.state.speed += step,
                Axis::Angle => self.state.angle += step,
            },
            Effect::Set { speed, angle } => {
                if let Some(speed) = speed {
                    self.state.speed = speed;
                }
                if let Some(angle) = angle {
                    self.state.angle = angle;
                }
            }
            Effect::Toggle(Counter::Record) => {
                self.record_toggles = self.record_toggles.wrapping_add(1);
            }
            Effect::Toggle(Counter::Terminate) => {
                self.terminate_requests = self.terminate_requests.saturating_add(1);
            }
        }
        self.clamp();
        self.state
    }

    /// Zero the steering angle, keeping speed.
    pub fn center_steering(&mut self) {
        self.state.angle = 0.0;
    }

    /// Force both axes to zero.
    pub fn halt(&mut self) {
        self.state = MotionState::STOPPED;
    }

    fn clamp(&mut self) {
        self.state.speed = self
            .state
            .speed
            .clamp(-self.limits.max_speed, self.limits.max_speed);
        self.state.angle = self
            .state
            .angle
            .clamp(-self.limits.max_angle, self.limits.max_angle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> MotionController {
        MotionController::new(CommandTable::standard(0.1, 0.5), MotionLimits::default())
    }

    #[test]
    fn increments_accumulate() {
        let mut ctl = controller();
        ctl.apply(ControlEvent::Accelerate);
        let state = ctl.apply(ControlEvent::Accelerate);
        assert!((state.speed - 0.2).abs() < 1e-6);
        assert_eq!(state.angle, 0.0);
    }

    #[test]
    fn increments_saturate_at_limits() {
        let mut ctl = controller();
        for _ in 0..50 {
            ctl.apply(ControlEvent::SteerLeft);
            ctl.apply(ControlEvent::Decelerate);
            let state = ctl.state();
            assert!(state.angle >= -1.0 && state.speed >= -1.0);
        }
        assert_eq!(ctl.state(), MotionState::new(-1.0, -1.0));
    }

    #[test]
    fn stop_zeroes_everything() {
        let mut ctl = controller();
        for _ in 0..7 {
            ctl.apply(ControlEvent::Accelerate);
            ctl.apply(ControlEvent::SteerRight);
        }
        let state = ctl.apply(ControlEvent::Stop);
        assert_eq!(state, MotionState::STOPPED);
    }

    #[test]
    fn go_sets_cruise_speed_and_keeps_angle() {
        let mut ctl = controller();
        ctl.apply(ControlEvent::SteerRight);
        let state = ctl.apply(ControlEvent::Go);
        assert_eq!(state.speed, 0.5);
        assert!((state.angle - 0.1).abs() < 1e-6);
    }

    #[test]
    fn toggles_count_without_moving() {
        let mut ctl = controller();
        ctl.apply(ControlEvent::ToggleRecord);
        ctl.apply(ControlEvent::ToggleRecord);
        let state = ctl.apply(ControlEvent::Quit);
        assert_eq!(state, MotionState::STOPPED);
        assert_eq!(ctl.counter(Counter::Record), 2);
        assert_eq!(ctl.counter(Counter::Terminate), 1);
    }

    #[test]
    fn unmapped_event_is_a_no_op() {
        let table = CommandTable::new().bind(
            ControlEvent::Accelerate,
            Effect::Increment {
                axis: Axis::Speed,
                step: 0.25,
            },
        );
        let mut ctl = MotionController::new(table, MotionLimits::default());
        ctl.apply(ControlEvent::Accelerate);
        let state = ctl.apply(ControlEvent::Stop);
        assert_eq!(state.speed, 0.25);
    }

    #[test]
    fn display_matches_transport_record() {
        assert_eq!(MotionState::new(0.5, -0.2).to_string(), "0.5,-0.2");
        assert_eq!(MotionState::STOPPED.to_string(), "0,0");
    }
}
