//! Motion command and sequence engine for a four-joint hobby-servo arm
//! driven over a serial text protocol.

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod state;
pub mod transport;
mod controller;
mod types;

pub use config::{ArmConfig, SequenceBook};
pub use controller::{CommandReply, Controller};
pub use error::{ArmError, ConfigError};
pub use registry::{GripperPreset, JointRegistry, JointSpec};
pub use state::SessionSnapshot;
pub use transport::{RecordingTransport, SerialTransport, Transport, TransportError};
pub use types::{
    Angle, Command, JointId, LinkStatus, MotionMode, MoveOutcome, Sequence, SequenceEvent, SequenceOutcome, SequenceStatus, Step,
};
