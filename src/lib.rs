//! Rover Kernel
//!
//! Control-and-logging core for a small camera-equipped wheeled rover. The
//! rover is either driven by an operator (collecting training data) or by a
//! trained steering model mapping a camera frame to `(speed, angle)`.
//!
//! # Control loop
//!
//! Everything runs in one cooperative, single-threaded loop. Each tick:
//!
//! 1. **Input**: the sampler reports which controls are held; the
//!    `EdgeDetector` turns that into fired events (rising edge by default).
//! 2. **Motion**: fired events trim, set or toggle through the
//!    `CommandTable`; the `MotionController` saturates the result.
//! 3. **Actuation**: the command goes to exactly one `ActuationSink`, either
//!    text records over a UART or duty cycles to a dual H-bridge.
//! 4. **Recording** (manual mode): while a session is open, one frame per tick
//!    is saved together with the command in effect when it was taken.
//! 5. **Inference** (autonomous mode): the `InferenceBridge` replaces steps
//!    1-2 as the source of commands.
//!
//! On quit, Ctrl-C or a fatal fault the loop stops the rover, flushes any open
//! session and releases the hardware in reverse order of acquisition.
//!
//! # Module Structure
//!
//! - `input`: control events, samplers and edge detection
//! - `motion`: motion state, dispatch table, saturation
//! - `actuation`: UART transport and differential-drive sinks
//! - `camera`: frame sources (V4L2, synthetic)
//! - `recording`: session state machine, frame and telemetry persistence
//! - `inference`: preprocessing, model backends, the inference bridge
//! - `control`: the control loop
//! - `config`: layered configuration

pub mod actuation;
pub mod camera;
pub mod config;
pub mod control;
pub mod frame;
pub mod inference;
pub mod input;
pub mod motion;
pub mod recording;

pub use actuation::{ActuationSink, DifferentialSink, MemoryTransport, TransportSink};
pub use camera::{CameraConfig, CameraFault, CameraFaultKind, FrameSource, V4l2Camera};
pub use config::{ActuationBackend, RoverConfig};
pub use control::{Components, ControlLoop, LoopConfig, LoopStats, Mode, TickOutcome};
pub use frame::{Frame, Roi};
pub use inference::{InferenceBridge, ModelFault, OutputOrder, SteeringModel};
pub use input::{ControlEvent, DebouncePolicy, EdgeDetector, InputSampler, ScriptedSampler};
pub use motion::{CommandTable, MotionController, MotionLimits, MotionState};
pub use recording::{RecordingSession, SessionState, SessionTick};
