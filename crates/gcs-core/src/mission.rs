//! Mission definition and construction helpers.
//!
//! A mission is a takeoff altitude, an ordered waypoint list and a list of
//! rotations executed after the waypoints. Patterns and command-list
//! construction mirror what the mission planner GUI produced.

use serde::{Deserialize, Serialize};

use crate::geometry::distance_3d;

/// Body-frame movement directions. Diagonals are scaled so the step length
/// matches the requested distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
    ForwardLeft,
    ForwardRight,
    BackLeft,
    BackRight,
}

const DIAGONAL: f64 = 0.707;

impl Direction {
    /// Unit displacement in the body frame (x forward, y right, z up).
    pub fn body_step(&self, distance_m: f64) -> [f64; 3] {
        let d = distance_m;
        match self {
            Direction::Forward => [d, 0.0, 0.0],
            Direction::Back => [-d, 0.0, 0.0],
            Direction::Left => [0.0, -d, 0.0],
            Direction::Right => [0.0, d, 0.0],
            Direction::Up => [0.0, 0.0, d],
            Direction::Down => [0.0, 0.0, -d],
            Direction::ForwardLeft => [d * DIAGONAL, -d * DIAGONAL, 0.0],
            Direction::ForwardRight => [d * DIAGONAL, d * DIAGONAL, 0.0],
            Direction::BackLeft => [-d * DIAGONAL, -d * DIAGONAL, 0.0],
            Direction::BackRight => [-d * DIAGONAL, d * DIAGONAL, 0.0],
        }
    }
}

/// One mission waypoint in room coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionWaypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MissionWaypoint {
    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A building block for [`Mission::from_commands`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MissionCommand {
    Move { direction: Direction, distance: f64 },
    Rotate { degrees: f64 },
    Goto { x: f64, y: f64, z: f64 },
}

/// A flight mission: waypoints first, rotations afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub takeoff_alt_m: f64,
    pub waypoints: Vec<MissionWaypoint>,
    pub rotations: Vec<f64>,
    #[serde(skip)]
    cursor: [f64; 3],
}

pub const DEFAULT_TAKEOFF_ALT_M: f64 = 0.5;

impl Mission {
    pub fn new(takeoff_alt_m: f64) -> Self {
        Self {
            takeoff_alt_m,
            waypoints: Vec::new(),
            rotations: Vec::new(),
            cursor: [0.0, 0.0, takeoff_alt_m],
        }
    }

    pub fn add_waypoint(&mut self, x: f64, y: f64, z: f64) {
        self.waypoints.push(MissionWaypoint { x, y, z });
        self.cursor = [x, y, z];
        tracing::debug!(x, y, z, "waypoint added");
    }

    /// Add a waypoint relative to the last one (or the takeoff point).
    pub fn add_relative_waypoint(&mut self, dx: f64, dy: f64, dz: f64) {
        let [x, y, z] = self.cursor;
        self.add_waypoint(x + dx, y + dy, z + dz);
    }

    pub fn add_rotation(&mut self, degrees: f64) {
        self.rotations.push(degrees);
    }

    /// Build a mission from a command list, starting at `start` (origin at
    /// takeoff altitude when absent).
    pub fn from_commands(commands: &[MissionCommand], start: Option<[f64; 3]>) -> Self {
        let mut mission = Mission::new(DEFAULT_TAKEOFF_ALT_M);
        mission.cursor = start.unwrap_or([0.0, 0.0, mission.takeoff_alt_m]);

        for command in commands {
            match command {
                MissionCommand::Move {
                    direction,
                    distance,
                } => {
                    let [dx, dy, dz] = direction.body_step(*distance);
                    mission.add_relative_waypoint(dx, dy, dz);
                }
                MissionCommand::Rotate { degrees } => mission.add_rotation(*degrees),
                MissionCommand::Goto { x, y, z } => mission.add_waypoint(*x, *y, *z),
            }
        }

        tracing::info!(waypoints = mission.waypoints.len(), "mission built");
        mission
    }

    /// A closed square of side `size_m`, flown counter-clockwise.
    pub fn square(size_m: f64, altitude_m: f64) -> Self {
        let mut mission = Mission::new(altitude_m);
        mission.cursor = [0.0, 0.0, altitude_m];
        mission.add_relative_waypoint(size_m, 0.0, 0.0);
        mission.add_relative_waypoint(0.0, size_m, 0.0);
        mission.add_relative_waypoint(-size_m, 0.0, 0.0);
        mission.add_relative_waypoint(0.0, -size_m, 0.0);
        mission
    }

    /// An equilateral triangle of side `size_m`.
    pub fn triangle(size_m: f64, altitude_m: f64) -> Self {
        let mut mission = Mission::new(altitude_m);
        mission.cursor = [0.0, 0.0, altitude_m];
        mission.add_relative_waypoint(size_m, 0.0, 0.0);
        mission.add_relative_waypoint(-size_m / 2.0, size_m * 0.866, 0.0);
        mission.add_relative_waypoint(-size_m / 2.0, -size_m * 0.866, 0.0);
        mission
    }

    /// A circle of diameter `size_m` sampled at 8 points, closed.
    pub fn circle(size_m: f64, altitude_m: f64) -> Self {
        let mut mission = Mission::new(altitude_m);
        let radius = size_m / 2.0;
        let num_points = 8usize;

        for i in 0..=num_points {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / num_points as f64;
            mission.add_waypoint(radius * angle.cos(), radius * angle.sin(), altitude_m);
        }
        mission
    }

    /// Out-and-back line of length `size_m`.
    pub fn line(size_m: f64, altitude_m: f64) -> Self {
        let mut mission = Mission::new(altitude_m);
        mission.cursor = [0.0, 0.0, altitude_m];
        mission.add_relative_waypoint(size_m, 0.0, 0.0);
        mission.add_relative_waypoint(-size_m, 0.0, 0.0);
        mission
    }

    /// Total path length starting from the takeoff point.
    pub fn total_distance_m(&self) -> f64 {
        let mut total = 0.0;
        let mut prev = [0.0, 0.0, self.takeoff_alt_m];
        for wp in &self.waypoints {
            total += distance_3d(prev, wp.as_array());
            prev = wp.as_array();
        }
        total
    }

    /// Rough flight-time estimate including per-step pauses.
    pub fn estimated_duration_s(
        &self,
        speed_mps: f64,
        waypoint_pause_s: f64,
        rotation_pause_s: f64,
    ) -> f64 {
        let travel = if speed_mps > 0.0 {
            self.total_distance_m() / speed_mps
        } else {
            0.0
        };
        travel
            + self.waypoints.len() as f64 * waypoint_pause_s
            + self.rotations.len() as f64 * rotation_pause_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_steps_scale_diagonals() {
        let [dx, dy, dz] = Direction::ForwardRight.body_step(2.0);
        assert!((dx - 1.414).abs() < 1e-9);
        assert!((dy - 1.414).abs() < 1e-9);
        assert_eq!(dz, 0.0);

        assert_eq!(Direction::Left.body_step(1.0), [0.0, -1.0, 0.0]);
        assert_eq!(Direction::Down.body_step(0.5), [0.0, 0.0, -0.5]);
    }

    #[test]
    fn square_returns_to_start() {
        let mission = Mission::square(2.0, 0.5);
        assert_eq!(mission.waypoints.len(), 4);
        let last = mission.waypoints.last().unwrap();
        assert!((last.x).abs() < 1e-9);
        assert!((last.y).abs() < 1e-9);
        assert!((mission.total_distance_m() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn circle_is_closed() {
        let mission = Mission::circle(2.0, 0.5);
        assert_eq!(mission.waypoints.len(), 9);
        let first = mission.waypoints.first().unwrap();
        let last = mission.waypoints.last().unwrap();
        assert!((first.x - last.x).abs() < 1e-9);
        assert!((first.y - last.y).abs() < 1e-9);
    }

    #[test]
    fn from_commands_tracks_cursor() {
        let mission = Mission::from_commands(
            &[
                MissionCommand::Move {
                    direction: Direction::Forward,
                    distance: 1.0,
                },
                MissionCommand::Move {
                    direction: Direction::Right,
                    distance: 2.0,
                },
                MissionCommand::Rotate { degrees: 90.0 },
                MissionCommand::Goto {
                    x: 0.0,
                    y: 0.0,
                    z: 1.0,
                },
            ],
            None,
        );

        assert_eq!(mission.waypoints.len(), 3);
        assert_eq!(
            mission.waypoints[1],
            MissionWaypoint {
                x: 1.0,
                y: 2.0,
                z: DEFAULT_TAKEOFF_ALT_M
            }
        );
        assert_eq!(mission.rotations, vec![90.0]);
    }

    #[test]
    fn duration_estimate_includes_pauses() {
        let mission = Mission::line(3.0, 0.5);
        // 3 m out from the takeoff point, then 3 m back
        let duration = mission.estimated_duration_s(0.3, 0.3, 0.5);
        assert!((duration - (6.0 / 0.3 + 2.0 * 0.3)).abs() < 1e-9);
    }
}
