//! Hardware abstraction over the vendor motion-commander surface.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a drone link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,

    #[error("vehicle is not airborne")]
    NotAirborne,

    #[error("deck inventory query failed: {0}")]
    DeckQuery(String),

    #[error("radio error: {0}")]
    Radio(String),
}

/// Which optional expansion decks the vehicle carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeckInventory {
    pub flow: bool,
    pub multiranger: bool,
}

/// Optical-flow deltas from the flow deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlowDelta {
    pub delta_x: i16,
    pub delta_y: i16,
}

/// Horizontal ranger distances from the multiranger deck, in meters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RangerSample {
    pub front_m: f64,
    pub back_m: f64,
    pub left_m: f64,
    pub right_m: f64,
}

/// One telemetry sample in the raw estimator frame.
///
/// Position/velocity/attitude follow the estimator's conventions; the
/// controller converts them to the room frame (see [`crate::frame`]).
/// Deck readings are absent when the deck is not installed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    /// `[roll, pitch, yaw]` in degrees.
    pub attitude: [f64; 3],
    pub battery_v: f64,
    /// Laser-ranger altitude from the flow deck, meters.
    pub zrange_alt_m: Option<f64>,
    pub flow: Option<FlowDelta>,
    pub ranger: Option<RangerSample>,
}

/// The motion-commander surface the runtime drives.
///
/// Horizontal arguments are body frame, x forward and y right; the
/// Crazyflie's own commander takes y to the left, so a hardware adapter
/// flips the lateral sign at the vendor call.
pub trait DroneLink: Send {
    /// Climb from the ground to `height_m`.
    fn take_off(&mut self, height_m: f64, velocity_mps: f64) -> Result<(), LinkError>;

    /// Descend and cut motors.
    fn land(&mut self, velocity_mps: f64) -> Result<(), LinkError>;

    /// Stop any motion and hover.
    fn stop(&mut self) -> Result<(), LinkError>;

    /// Start a constant-velocity motion (body frame, m/s, deg/s).
    fn start_linear_motion(
        &mut self,
        vx_mps: f64,
        vy_mps: f64,
        vz_mps: f64,
        yaw_rate_dps: f64,
    ) -> Result<(), LinkError>;

    /// Fly a relative displacement (body frame, meters).
    fn move_distance(
        &mut self,
        dx_m: f64,
        dy_m: f64,
        dz_m: f64,
        velocity_mps: f64,
    ) -> Result<(), LinkError>;

    /// Rotate by a signed heading delta, positive clockwise from above.
    fn turn(&mut self, degrees: f64) -> Result<(), LinkError>;

    /// Reset the onboard state estimator before flight.
    fn reset_estimator(&mut self) -> Result<(), LinkError>;

    /// Read the current telemetry sample.
    fn sample(&mut self) -> Result<RawSample, LinkError>;

    /// Probe which optional decks are installed. A failure here downgrades
    /// deck features instead of failing startup.
    fn deck_inventory(&mut self) -> Result<DeckInventory, LinkError>;

    /// Advance link-internal time. Hardware links ignore this; the
    /// simulator integrates its kinematics here.
    fn advance(&mut self, _dt: Duration) {}
}
