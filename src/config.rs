//! Joint table, gripper presets and named sequences, loadable from TOML.
//!
//! ```toml
//! debounce_ms = 100
//!
//! [gripper]
//! open = 60
//! closed = 110
//!
//! [joints.gripper]
//! min = 60
//! max = 120
//! home = 90
//! settle_ms = 100
//!
//! [[sequences.WAVE]]
//! joint = "base"
//! target = 60
//! hold_ms = 300
//!
//! [[sequences.GRAB]]
//! joint = "gripper"
//! target = "closed"
//! hold_ms = 800
//! ```
//!
//! Keys left out fall back to the built-in tables. A `sequences` table
//! replaces the built-in sequences as a whole.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::constants::{DEBOUNCE_MS, DEFAULT_SMOOTH_MS, SERVO_MAX_ANGLE, SERVO_MIN_ANGLE};
use crate::error::ConfigError;
use crate::registry::{GripperPositions, GripperPreset, JointRegistry, JointSpec};
use crate::types::{Angle, JointId, Sequence, Step};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArmConfig {
    pub debounce_ms: u64,
    /// Smooth-move duration used when driving joints home.
    pub home_duration_ms: u64,
    /// Let manual moves interleave with a running sequence.
    pub allow_manual_during_sequence: bool,
    pub gripper: GripperPositions,
    pub joints: JointsConfig,
    pub sequences: BTreeMap<String, Vec<StepSpec>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JointsConfig {
    pub base: JointSpec,
    pub shoulder: JointSpec,
    pub elbow: JointSpec,
    pub gripper: JointSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub joint: JointId,
    pub target: StepTarget,
    pub hold_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StepTarget {
    Angle(Angle),
    Preset(GripperPreset),
}

/// Named sequences, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SequenceBook {
    sequences: BTreeMap<String, Arc<Sequence>>,
}

impl SequenceBook {
    pub fn get(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences.get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl ArmConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded config from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validates the tables and resolves gripper presets into angles.
    pub fn build(&self) -> Result<(JointRegistry, SequenceBook), ConfigError> {
        let joints = &self.joints;
        for (joint, spec) in [
            (JointId::Base, &joints.base),
            (JointId::Shoulder, &joints.shoulder),
            (JointId::Elbow, &joints.elbow),
            (JointId::Gripper, &joints.gripper),
        ] {
            validate_joint(joint, spec)?;
        }
        for (label, angle) in [("open", self.gripper.open), ("closed", self.gripper.closed)] {
            if !(joints.gripper.min..=joints.gripper.max).contains(&angle) {
                return Err(ConfigError::InvalidJoint {
                    joint: JointId::Gripper,
                    reason: format!("{} position {} is outside {}..={}", label, angle, joints.gripper.min, joints.gripper.max),
                });
            }
        }

        let registry = JointRegistry::new(joints.base, joints.shoulder, joints.elbow, joints.gripper, self.gripper);

        let mut book = SequenceBook::default();
        for (name, specs) in &self.sequences {
            let key = name.to_ascii_uppercase();
            if book.sequences.contains_key(&key) {
                return Err(ConfigError::InvalidSequence {
                    name: name.clone(),
                    reason: "name differs from another sequence only by case".into(),
                });
            }
            let sequence = resolve_sequence(&key, specs, &registry)?;
            book.sequences.insert(key, Arc::new(sequence));
        }

        Ok((registry, book))
    }
}

fn validate_joint(joint: JointId, spec: &JointSpec) -> Result<(), ConfigError> {
    let reason = if spec.min > spec.max {
        Some(format!("min {} is above max {}", spec.min, spec.max))
    } else if spec.min < SERVO_MIN_ANGLE || spec.max > SERVO_MAX_ANGLE {
        Some(format!("range {}..={} leaves the servo's 0..=180", spec.min, spec.max))
    } else if !(spec.min..=spec.max).contains(&spec.home) {
        Some(format!("home {} is outside {}..={}", spec.home, spec.min, spec.max))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidJoint { joint, reason }),
        None => Ok(()),
    }
}

fn resolve_sequence(name: &str, specs: &[StepSpec], registry: &JointRegistry) -> Result<Sequence, ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::InvalidSequence {
            name: name.to_string(),
            reason: "sequence has no steps".into(),
        });
    }
    let mut steps = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let target = match spec.target {
            StepTarget::Angle(angle) => angle,
            StepTarget::Preset(preset) if spec.joint == JointId::Gripper => registry.gripper_angle(preset),
            StepTarget::Preset(preset) => {
                return Err(ConfigError::InvalidSequence {
                    name: name.to_string(),
                    reason: format!("step {}: gripper preset {:?} used on {}", index, preset, spec.joint),
                })
            }
        };
        steps.push(Step::new(spec.joint, target, spec.hold_ms));
    }
    Ok(Sequence::new(name, steps))
}

impl Default for JointsConfig {
    fn default() -> Self {
        let registry = JointRegistry::default();
        JointsConfig {
            base: *registry.spec(JointId::Base),
            shoulder: *registry.spec(JointId::Shoulder),
            elbow: *registry.spec(JointId::Elbow),
            gripper: *registry.spec(JointId::Gripper),
        }
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        ArmConfig {
            debounce_ms: DEBOUNCE_MS,
            home_duration_ms: DEFAULT_SMOOTH_MS,
            allow_manual_during_sequence: false,
            gripper: GripperPositions::default(),
            joints: JointsConfig::default(),
            sequences: builtin_sequences(),
        }
    }
}

fn builtin_sequences() -> BTreeMap<String, Vec<StepSpec>> {
    use GripperPreset::{Closed, Home, Open};
    use JointId::{Base, Elbow, Gripper, Shoulder};

    fn at(joint: JointId, angle: Angle, hold_ms: u64) -> StepSpec {
        StepSpec {
            joint,
            target: StepTarget::Angle(angle),
            hold_ms,
        }
    }
    fn grip(preset: GripperPreset, hold_ms: u64) -> StepSpec {
        StepSpec {
            joint: Gripper,
            target: StepTarget::Preset(preset),
            hold_ms,
        }
    }

    let mut sequences = BTreeMap::new();
    sequences.insert(
        "WAVE".to_string(),
        vec![at(Base, 60, 300), at(Base, 120, 300), at(Base, 60, 300), at(Base, 90, 300)],
    );
    sequences.insert(
        "NOD_YES".to_string(),
        vec![at(Elbow, 110, 400), at(Elbow, 70, 400), at(Elbow, 110, 400), at(Elbow, 90, 400)],
    );
    sequences.insert(
        "SHAKE_NO".to_string(),
        vec![at(Base, 70, 200), at(Base, 110, 200), at(Base, 70, 200), at(Base, 90, 200)],
    );
    sequences.insert(
        "HAND_OVER".to_string(),
        vec![
            grip(Open, 1000),
            at(Shoulder, 60, 800),
            at(Elbow, 140, 1200),
            grip(Closed, 1200),
            at(Elbow, 90, 800),
            at(Shoulder, 90, 800),
            at(Shoulder, 120, 800),
            at(Elbow, 130, 1200),
            grip(Open, 1200),
            at(Elbow, 90, 800),
            at(Shoulder, 90, 800),
            grip(Home, 800),
        ],
    );
    sequences.insert(
        "PICK_PLACE".to_string(),
        vec![
            grip(Open, 1000),
            at(Shoulder, 120, 800),
            at(Elbow, 140, 1200),
            grip(Closed, 1200),
            at(Elbow, 90, 800),
            at(Shoulder, 90, 800),
            at(Base, 120, 1000),
            at(Shoulder, 120, 800),
            at(Elbow, 140, 1000),
            grip(Open, 1200),
            at(Elbow, 90, 800),
            at(Shoulder, 90, 800),
            at(Base, 90, 1000),
            grip(Home, 800),
        ],
    );
    sequences
}
