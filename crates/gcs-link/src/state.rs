//! Vehicle state owned by the controller and the snapshots it publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::link::{FlowDelta, RangerSample};

/// Flight lifecycle of the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightState {
    Disconnected,
    #[default]
    Connected,
    Armed,
    TakingOff,
    Flying,
    ChangingAltitude,
    Returning,
    Landing,
}

impl FlightState {
    /// States in which the horizontal fences watch and correct.
    pub fn is_flying(&self) -> bool {
        matches!(self, FlightState::Flying)
    }
}

/// Mutable vehicle state, room frame. Owned exclusively by the controller
/// task.
#[derive(Debug, Clone, Default)]
pub struct VehicleState {
    pub state: FlightState,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    /// `[roll, pitch, yaw]` degrees, room frame.
    pub attitude: [f64; 3],
    pub battery_v: f64,
    pub zrange_alt_m: Option<f64>,
    pub flow: Option<FlowDelta>,
    pub ranger: Option<RangerSample>,
}

impl VehicleState {
    pub fn yaw_deg(&self) -> f64 {
        self.attitude[2]
    }
}

/// Snapshot published on the telemetry channel, room frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub state: FlightState,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub battery_v: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zrange_alt_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranger: Option<RangerSample>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn from_state(state: &VehicleState) -> Self {
        Self {
            state: state.state,
            position: state.position,
            velocity: state.velocity,
            roll_deg: state.attitude[0],
            pitch_deg: state.attitude[1],
            yaw_deg: state.attitude[2],
            battery_v: state.battery_v,
            zrange_alt_m: state.zrange_alt_m,
            flow: state.flow,
            ranger: state.ranger,
            timestamp: Utc::now(),
        }
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::from_state(&VehicleState::default())
    }
}
