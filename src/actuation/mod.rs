//! Actuation sinks.
//!
//! A sink turns the commanded `MotionState` into something that moves the
//! rover. Exactly one sink is active per deployment:
//! - `TransportSink`: `"<speed>,<angle>"` records over a byte transport to a
//!   downstream motor controller (UART)
//! - `DifferentialSink`: left/right duty cycles and directions straight to a
//!   dual-motor driver
//!
//! Both accept `stop()` and `release()` at any point, including before the
//! first command was ever sent.

pub mod differential;
pub mod serial;
pub mod sysfs;
pub mod transport;

use anyhow::Result;

use crate::motion::MotionState;

pub use differential::{
    mix, Actuator, DifferentialSink, Direction, DriveCommand, MemoryActuator, MixerConfig,
};
pub use serial::SerialTransport;
pub use sysfs::{SysfsActuator, SysfsLayout};
pub use transport::{link_check, MemoryTransport, Transport, TransportSink, WriteStatus};

/// Converts motion commands into drive output.
pub trait ActuationSink {
    /// Sink identifier for logs.
    fn name(&self) -> &'static str;

    /// Send the command for this tick.
    fn send(&mut self, state: MotionState) -> Result<()>;

    /// Bring the rover to a halt.
    fn stop(&mut self) -> Result<()>;

    /// Give the underlying hardware back. Safe to call at any time, and more
    /// than once.
    fn release(&mut self) -> Result<()>;
}

impl<S: ActuationSink + ?Sized> ActuationSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send(&mut self, state: MotionState) -> Result<()> {
        (**self).send(state)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}
