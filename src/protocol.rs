//! Text frames understood by the servo firmware.
//!
//! Instant move: `#<channel>P<pulse>\n`
//! Smooth move:  `#<channel>S<pulse>T<duration_ms>\n`
//!
//! Angles are expected to be pre-clamped to 0..=180; this module only formats.

use crate::constants::{PULSE_MAX, PULSE_MIN, SERVO_MAX_ANGLE};
use crate::types::{Angle, JointId};

/// Linear map from 0..=180 degrees onto the 500..=2500 µs pulse width.
pub fn angle_to_pulse(angle: Angle) -> u32 {
    let span = (PULSE_MAX - PULSE_MIN) as f64;
    let pulse = PULSE_MIN as f64 + (angle as f64 / SERVO_MAX_ANGLE as f64) * span;
    pulse.floor() as u32
}

pub fn encode_instant(joint: JointId, angle: Angle) -> Vec<u8> {
    format!("#{}P{}\n", joint.channel(), angle_to_pulse(angle)).into_bytes()
}

pub fn encode_smooth(joint: JointId, angle: Angle, duration_ms: u64) -> Vec<u8> {
    format!("#{}S{}T{}\n", joint.channel(), angle_to_pulse(angle), duration_ms).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pulse_endpoints() {
        assert_eq!(angle_to_pulse(0), 500);
        assert_eq!(angle_to_pulse(180), 2500);
        assert_eq!(angle_to_pulse(90), 1500);
        // 500 + 1/180 * 2000 = 511.11..
        assert_eq!(angle_to_pulse(1), 511);
    }

    #[test]
    fn instant_frame_layout() {
        assert_eq!(encode_instant(JointId::Base, 0), b"#0P500\n".to_vec());
        assert_eq!(encode_instant(JointId::Gripper, 180), b"#3P2500\n".to_vec());
    }

    #[test]
    fn smooth_frame_layout() {
        assert_eq!(encode_smooth(JointId::Elbow, 180, 600), b"#2S2500T600\n".to_vec());
        assert_eq!(encode_smooth(JointId::Shoulder, 0, 10_000), b"#1S500T10000\n".to_vec());
    }

    proptest! {
        #[test]
        fn pulse_stays_in_servo_range(angle in 0i32..=180) {
            let pulse = angle_to_pulse(angle);
            prop_assert!((PULSE_MIN..=PULSE_MAX).contains(&pulse));
        }

        #[test]
        fn encoding_is_deterministic(angle in 0i32..=180, duration in 100u64..=10_000) {
            prop_assert_eq!(encode_instant(JointId::Base, angle), encode_instant(JointId::Base, angle));
            prop_assert_eq!(
                encode_smooth(JointId::Elbow, angle, duration),
                encode_smooth(JointId::Elbow, angle, duration)
            );
        }
    }
}
