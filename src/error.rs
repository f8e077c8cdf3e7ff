use std::path::PathBuf;
use thiserror::Error;

use crate::transport::TransportError;
use crate::types::JointId;

#[derive(Error, Debug)]
pub enum ArmError {
    #[error("cannot {operation}: arm is not connected")]
    NotConnected { operation: &'static str },

    #[error("cannot start {requested}: {active} is already running")]
    AlreadyRunning { requested: String, active: String },

    #[error("write to {joint} failed: {source}")]
    TransportWriteFailed {
        joint: JointId,
        #[source]
        source: TransportError,
    },

    #[error("invalid sequence {name:?}: {reason}")]
    InvalidSequence { name: String, reason: String },

    /// Manual move refused because a sequence owns the arm.
    #[error("cannot move {joint}: a sequence is running")]
    SequenceActive { joint: JointId },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid joint {joint}: {reason}")]
    InvalidJoint { joint: JointId, reason: String },

    #[error("invalid sequence {name:?}: {reason}")]
    InvalidSequence { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = ArmError::TransportWriteFailed {
            joint: JointId::Elbow,
            source: TransportError::Closed,
        };
        assert!(err.to_string().contains("elbow"), "{}", err);

        let err = ArmError::AlreadyRunning {
            requested: "WAVE".into(),
            active: "NOD_YES".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("WAVE") && msg.contains("NOD_YES"), "{}", msg);

        let err = ConfigError::InvalidSequence {
            name: "DANCE".into(),
            reason: "no steps".into(),
        };
        assert!(err.to_string().contains("DANCE"));
    }
}
