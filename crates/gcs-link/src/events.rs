//! Typed event stream published by the controller.
//!
//! One broadcast channel replaces per-callsite callbacks; every observer
//! sees the same typed stream.

use serde::{Deserialize, Serialize};

use gcs_core::geofence::BreachAction;

use crate::state::FlightState;

/// Which fence produced a breach or veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceKind {
    Rect,
    Polygon,
    Floor,
    Ceiling,
}

/// Which operation an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverKind {
    Arm,
    TakeOff,
    Goto,
    MoveDistance,
    Nav,
    ChangeHeading,
    ChangeAltitude,
    Rtl,
    Land,
    Rc,
    Mission,
}

/// Why a command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotConnected,
    NotArmed,
    NotFlying,
    FenceViolation(FenceKind),
}

/// Events emitted by the controller task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DroneEvent {
    StateChanged {
        from: FlightState,
        to: FlightState,
    },
    /// The vehicle was found outside a fence and the configured response
    /// was taken.
    GeofenceBreach {
        fence: FenceKind,
        position: [f64; 3],
        action: BreachAction,
    },
    /// Continuous motion (nav or RC) was stopped because its predicted
    /// position would breach a fence.
    MotionBlocked {
        fence: FenceKind,
    },
    ManeuverComplete {
        kind: ManeuverKind,
    },
    ManeuverRejected {
        kind: ManeuverKind,
        reason: RejectReason,
    },
    MissionProgress {
        waypoint: usize,
        total: usize,
    },
    MissionComplete,
    MissionAborted,
    /// A link call failed; the vehicle keeps its previous state.
    LinkTrouble {
        detail: String,
    },
}
