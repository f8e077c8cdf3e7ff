// Servo pulse domain (microseconds)
pub const PULSE_MIN: u32 = 500;
pub const PULSE_MAX: u32 = 2500;

// Servo angle domain (degrees)
pub const SERVO_MIN_ANGLE: i32 = 0;
pub const SERVO_MAX_ANGLE: i32 = 180;

// Smooth motion timing accepted by the firmware
pub const SMOOTH_MIN_MS: u64 = 100;
pub const SMOOTH_MAX_MS: u64 = 10_000;
pub const DEFAULT_SMOOTH_MS: u64 = 600;

pub const DEBOUNCE_MS: u64 = 100;

// Serial link
pub const BAUD_RATE: u32 = 115_200;
pub const LINK_SETTLE_MS: u64 = 2000;
pub const WRITE_TIMEOUT_MS: u64 = 500;
