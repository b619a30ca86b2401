//! Telemetry field selection.
//!
//! Observers usually take the whole [`TelemetrySnapshot`] from the watch
//! channel; `project` builds the flat key/value view that dashboards and
//! loggers consume, restricted to the requested field groups.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::state::TelemetrySnapshot;

/// Selectable telemetry groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryField {
    Position,
    Velocity,
    Battery,
    Attitude,
    Flow,
    Altitude,
    Ranger,
}

/// Project a snapshot to a flat map of the requested groups.
///
/// Deck-backed groups are silently absent when the deck is not installed.
pub fn project(snapshot: &TelemetrySnapshot, fields: &[TelemetryField]) -> Map<String, Value> {
    let mut out = Map::new();

    for field in fields {
        match field {
            TelemetryField::Position => {
                out.insert("position_x".to_string(), json!(snapshot.position[0]));
                out.insert("position_y".to_string(), json!(snapshot.position[1]));
                out.insert("position_z".to_string(), json!(snapshot.position[2]));
            }
            TelemetryField::Velocity => {
                out.insert("velocity_x".to_string(), json!(snapshot.velocity[0]));
                out.insert("velocity_y".to_string(), json!(snapshot.velocity[1]));
                out.insert("velocity_z".to_string(), json!(snapshot.velocity[2]));
            }
            TelemetryField::Battery => {
                out.insert("battery_v".to_string(), json!(snapshot.battery_v));
            }
            TelemetryField::Attitude => {
                out.insert("roll_deg".to_string(), json!(snapshot.roll_deg));
                out.insert("pitch_deg".to_string(), json!(snapshot.pitch_deg));
                out.insert("yaw_deg".to_string(), json!(snapshot.yaw_deg));
            }
            TelemetryField::Flow => {
                if let Some(flow) = &snapshot.flow {
                    out.insert("flow_delta_x".to_string(), json!(flow.delta_x));
                    out.insert("flow_delta_y".to_string(), json!(flow.delta_y));
                }
            }
            TelemetryField::Altitude => {
                if let Some(alt) = snapshot.zrange_alt_m {
                    out.insert("zrange_alt_m".to_string(), json!(alt));
                }
            }
            TelemetryField::Ranger => {
                if let Some(ranger) = &snapshot.ranger {
                    out.insert("range_front_m".to_string(), json!(ranger.front_m));
                    out.insert("range_back_m".to_string(), json!(ranger.back_m));
                    out.insert("range_left_m".to_string(), json!(ranger.left_m));
                    out.insert("range_right_m".to_string(), json!(ranger.right_m));
                }
            }
        }
    }

    out
}
