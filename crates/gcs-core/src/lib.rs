pub mod error;
pub mod flightmap;
pub mod geofence;
pub mod geometry;
pub mod mission;
pub mod pathfinding;

pub use error::{GeofenceError, MapError};
pub use flightmap::{FlightMap, MapObstacle, MapStats, MapSummary, MapValidation};
pub use geofence::{AltitudeFence, BreachAction, PolygonFence, RectFence};
pub use mission::{Direction, Mission, MissionCommand, MissionWaypoint};
pub use pathfinding::{MissionCheck, Obstacle, PathFinder, PointClass};
