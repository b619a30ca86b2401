//! Drone runtime for the ground-control station.
//!
//! The vendor radio link is hidden behind the [`DroneLink`] trait; a
//! kinematic [`SimLink`] stands in for it off-hardware. A single controller
//! task owns the link and all vehicle state; callers talk to it through a
//! [`Drone`] handle over a command queue and observe it through telemetry
//! and event channels.

pub mod command;
pub mod controller;
pub mod events;
pub mod fence;
pub mod frame;
pub mod link;
pub mod rc;
pub mod sim;
pub mod state;
pub mod telemetry;

pub use command::DroneCommand;
pub use controller::{ControllerConfig, ControllerGone, Drone};
pub use events::{DroneEvent, FenceKind, ManeuverKind, RejectReason};
pub use link::{DeckInventory, DroneLink, LinkError, RawSample};
pub use sim::{SimLink, SimParams};
pub use state::{FlightState, TelemetrySnapshot};
pub use telemetry::TelemetryField;
