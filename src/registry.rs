//! Per-joint limits, home pose and settle timing.

use serde::Deserialize;
use strum::IntoEnumIterator;

use crate::types::{clamp_angle, Angle, JointId};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JointSpec {
    pub min: Angle,
    pub max: Angle,
    pub home: Angle,
    /// Pause after this joint is sent home before moving the next one.
    pub settle_ms: u64,
}

impl JointSpec {
    pub const fn new(min: Angle, max: Angle, home: Angle, settle_ms: u64) -> Self {
        JointSpec { min, max, home, settle_ms }
    }

    pub fn clamp(&self, angle: Angle) -> Angle {
        clamp_angle(angle, self.min, self.max)
    }
}

/// Named gripper positions.
///
/// Older sequence tables disagree on which end of the gripper range is
/// "open". This crate uses one convention: the lower angle opens the claw and
/// the higher angle closes it. Tables reference presets, never raw angles.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperPreset {
    Open,
    Closed,
    Home,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GripperPositions {
    pub open: Angle,
    pub closed: Angle,
}

impl Default for GripperPositions {
    fn default() -> Self {
        GripperPositions { open: 60, closed: 110 }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JointRegistry {
    specs: [JointSpec; 4],
    gripper: GripperPositions,
}

impl JointRegistry {
    pub fn new(base: JointSpec, shoulder: JointSpec, elbow: JointSpec, gripper: JointSpec, positions: GripperPositions) -> Self {
        JointRegistry {
            specs: [base, shoulder, elbow, gripper],
            gripper: positions,
        }
    }

    pub fn spec(&self, joint: JointId) -> &JointSpec {
        &self.specs[joint as usize]
    }

    pub fn clamp(&self, joint: JointId, angle: Angle) -> Angle {
        self.spec(joint).clamp(angle)
    }

    pub fn home(&self, joint: JointId) -> Angle {
        self.spec(joint).home
    }

    /// Gripper angle for a preset, clamped into the gripper's range.
    pub fn gripper_angle(&self, preset: GripperPreset) -> Angle {
        let angle = match preset {
            GripperPreset::Open => self.gripper.open,
            GripperPreset::Closed => self.gripper.closed,
            GripperPreset::Home => self.home(JointId::Gripper),
        };
        self.clamp(JointId::Gripper, angle)
    }

    pub fn gripper_positions(&self) -> GripperPositions {
        self.gripper
    }

    /// Every joint paired with its home angle, in registry order.
    pub fn home_pose(&self) -> Vec<(JointId, Angle)> {
        JointId::iter().map(|joint| (joint, self.home(joint))).collect()
    }
}

impl Default for JointRegistry {
    fn default() -> Self {
        JointRegistry::new(
            JointSpec::new(0, 180, 90, 700),
            JointSpec::new(0, 180, 90, 500),
            JointSpec::new(0, 180, 90, 400),
            JointSpec::new(60, 120, 90, 100),
            GripperPositions::default(),
        )
    }
}
