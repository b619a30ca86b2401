//! Commands accepted by the controller task.

use gcs_core::geofence::{BreachAction, PolygonFence, RectFence};
use gcs_core::mission::{Direction, Mission};

use crate::rc::RcFrame;

/// Everything a caller can ask the vehicle to do. Sent over the handle's
/// command queue; the controller is the only executor.
#[derive(Debug, Clone)]
pub enum DroneCommand {
    /// Arm from `Connected`: estimator reset, motion commander ready.
    Arm,
    TakeOff {
        altitude_m: f64,
    },
    /// Fly to a room-frame position.
    Goto {
        x: f64,
        y: f64,
        z: f64,
    },
    /// Fly a body-frame step in one of the supported directions.
    MoveDistance {
        direction: Direction,
        distance_m: f64,
    },
    /// Start continuous motion in a direction at the nav speed.
    Nav {
        direction: Direction,
    },
    /// Stop continuous motion and hover.
    Halt,
    /// Rotate to an absolute heading, degrees.
    ChangeHeading {
        degrees: f64,
    },
    ChangeAltitude {
        altitude_m: f64,
    },
    /// Return to the launch point at the current altitude, then land.
    Rtl,
    /// Land in place.
    Land,
    SetNavSpeed {
        speed_mps: f64,
    },
    SetMoveSpeed {
        speed_mps: f64,
    },
    SetRectFence {
        fence: RectFence,
        action: BreachAction,
    },
    ClearRectFence,
    SetPolygonFence {
        fence: PolygonFence,
        action: BreachAction,
    },
    ClearPolygonFence,
    SetAltitudeFloor {
        altitude_m: f64,
    },
    ClearAltitudeFloor,
    SetAltitudeCeiling {
        altitude_m: f64,
    },
    ClearAltitudeCeiling,
    /// Apply one RC input frame (1000-2000 us channels).
    SendRc(RcFrame),
    RunMission {
        mission: Mission,
    },
    /// Stop the controller task.
    Shutdown,
}
