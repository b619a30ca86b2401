//! RC-style input conversion.
//!
//! Joystick layers produce the classic 1000-2000 us channel convention;
//! this module converts it to normalized setpoints. Values between 1400
//! and 1600 us snap to center to absorb controller drift.

use serde::{Deserialize, Serialize};

/// How a channel maps to a normalized range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcChannel {
    /// Roll/pitch/yaw: 1000 -> -1, 1500 -> 0, 2000 -> +1.
    Symmetric,
    /// Throttle: 1000 -> 0, 2000 -> 1.
    Throttle,
}

/// Convert a raw channel value to its normalized range, clamped.
pub fn rc_to_normalized(value_us: f64, channel: RcChannel) -> f64 {
    match channel {
        RcChannel::Throttle => ((value_us - 1000.0) / 1000.0).clamp(0.0, 1.0),
        RcChannel::Symmetric => ((value_us - 1500.0) / 500.0).clamp(-1.0, 1.0),
    }
}

/// Snap drifting near-center values to 1500 us.
pub fn apply_deadband(value_us: f64) -> f64 {
    if value_us > 1400.0 && value_us < 1600.0 {
        1500.0
    } else {
        value_us
    }
}

/// One RC input frame, raw channel values in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcFrame {
    pub roll_us: f64,
    pub pitch_us: f64,
    pub throttle_us: f64,
    pub yaw_us: f64,
}

/// Normalized stick deflections after deadband, all centered on zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RcSetpoint {
    pub roll: f64,
    pub pitch: f64,
    pub throttle: f64,
    pub yaw: f64,
}

impl RcFrame {
    /// Deadband every channel, then scale to proportional deflections
    /// around center (throttle included, so hovering sticks read zero).
    pub fn to_setpoint(&self) -> RcSetpoint {
        let scale = |value_us: f64| (apply_deadband(value_us) - 1500.0) / 500.0;
        RcSetpoint {
            roll: scale(self.roll_us),
            pitch: scale(self.pitch_us),
            throttle: scale(self.throttle_us),
            yaw: scale(self.yaw_us),
        }
    }
}
