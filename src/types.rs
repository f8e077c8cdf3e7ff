use serde::Deserialize;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::{SERVO_MAX_ANGLE, SERVO_MIN_ANGLE, SMOOTH_MAX_MS, SMOOTH_MIN_MS};

/// Integer degrees.
pub type Angle = i32;

#[derive(Debug, EnumIter, Display, EnumString, Deserialize, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum JointId {
    Base = 0,     // rotation
    Shoulder = 1, // forward / back
    Elbow = 2,    // up / down
    Gripper = 3,  // claw
}

impl JointId {
    /// Channel number used in the wire protocol.
    pub fn channel(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MotionMode {
    Instant,
    /// Firmware-interpolated move over the given number of milliseconds.
    Smooth(u64),
}

impl MotionMode {
    pub fn smooth(duration_ms: u64) -> Self {
        MotionMode::Smooth(clamp_duration(duration_ms))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connected,
    Simulated,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Step {
    pub joint: JointId,
    pub target: Angle,
    pub hold_ms: u64,
}

impl Step {
    pub const fn new(joint: JointId, target: Angle, hold_ms: u64) -> Self {
        Step { joint, target, hold_ms }
    }
}

/// A named gesture. Immutable once built.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Sequence {
    name: String,
    steps: Arc<[Step]>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Sequence {
            name: name.into(),
            steps: steps.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A resolved intent from whatever drives the arm (UI, CLI, speech front end).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    Move { joint: JointId, angle: Angle },
    RunSequence { name: String },
    GoHome,
    Stop,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MoveOutcome {
    /// Frame written to the transport.
    Sent,
    /// Parked behind the debounce timer for this joint.
    Scheduled,
    /// Smooth move shorter than one degree; nothing written.
    Skipped,
    /// Simulated link; position recorded only.
    Simulated,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SequenceStatus {
    Completed,
    Cancelled { at_step: usize },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SequenceOutcome {
    pub name: String,
    pub status: SequenceStatus,
    pub steps_executed: usize,
    pub write_failures: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SequenceEvent {
    Started { name: String },
    StepDispatched { name: String, index: usize, step: Step },
    Completed { name: String },
    Cancelled { name: String, at_step: usize },
    Homed,
}

pub(crate) fn clamp_angle(angle: Angle, min: Angle, max: Angle) -> Angle {
    angle.max(min).min(max)
}

pub(crate) fn clamp_servo_angle(angle: Angle) -> Angle {
    clamp_angle(angle, SERVO_MIN_ANGLE, SERVO_MAX_ANGLE)
}

pub(crate) fn clamp_duration(duration_ms: u64) -> u64 {
    duration_ms.max(SMOOTH_MIN_MS).min(SMOOTH_MAX_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn joint_names_round_trip_through_strum() {
        for joint in JointId::iter() {
            assert_eq!(JointId::from_str(&joint.to_string()).unwrap(), joint);
        }
        assert_eq!(JointId::from_str("GRIPPER").unwrap(), JointId::Gripper);
        assert!(JointId::from_str("wrist").is_err());
    }

    #[test]
    fn channels_match_wire_ids() {
        let channels: Vec<u8> = JointId::iter().map(JointId::channel).collect();
        assert_eq!(channels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn smooth_duration_is_clamped() {
        assert_eq!(MotionMode::smooth(5), MotionMode::Smooth(100));
        assert_eq!(MotionMode::smooth(60_000), MotionMode::Smooth(10_000));
        assert_eq!(MotionMode::smooth(750), MotionMode::Smooth(750));
    }

    #[test]
    fn default_link_is_disconnected() {
        assert_eq!(LinkStatus::default(), LinkStatus::Disconnected);
    }
}
