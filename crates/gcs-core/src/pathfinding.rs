//! Grid-based path planning inside a polygonal flight cage.
//!
//! The planner searches an implicit 8-connected 2-D grid at a fixed
//! resolution, keeps the start altitude through the whole path, and falls
//! back to a direct line whenever nothing blocks it. Altitude is planned
//! separately by the caller.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GeofenceError;
use crate::flightmap::FlightMap;
use crate::geometry::{distance_2d, distance_to_segment, point_in_polygon};

/// Default grid step in meters.
pub const DEFAULT_RESOLUTION_M: f64 = 0.2;

/// Safety margin kept around every obstacle, in meters.
pub const OBSTACLE_MARGIN_M: f64 = 0.3;

/// Search is abandoned after this many expansions.
const MAX_ITERATIONS: usize = 5000;

/// A polygonal no-fly obstacle with a fixed safety margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    points: Vec<[f64; 2]>,
    pub safety_margin_m: f64,
}

impl Obstacle {
    pub fn new(points: Vec<[f64; 2]>) -> Result<Self, GeofenceError> {
        if points.len() < 3 {
            return Err(GeofenceError::TooFewVertices(points.len()));
        }
        Ok(Self {
            points,
            safety_margin_m: OBSTACLE_MARGIN_M,
        })
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    /// True when the point lies strictly inside the obstacle polygon.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        point_in_polygon(x, y, &self.points)
    }

    /// True when the point is inside the polygon or within the safety
    /// margin of one of its edges.
    pub fn near(&self, x: f64, y: f64) -> bool {
        if self.contains(x, y) {
            return true;
        }

        for i in 0..self.points.len() {
            let a = self.points[i];
            let b = self.points[(i + 1) % self.points.len()];
            if distance_to_segment(x, y, a[0], a[1], b[0], b[1]) < self.safety_margin_m {
                return true;
            }
        }
        false
    }
}

/// Why a point is (or is not) safe to fly to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointClass {
    Safe,
    OutsideCage,
    NearObstacle,
}

/// Result of checking a waypoint list against the cage and obstacles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionCheck {
    pub valid: bool,
    pub problems: Vec<String>,
    /// Replacement waypoint list with detours inserted, when one could be
    /// built.
    pub corrected: Option<Vec<[f64; 3]>>,
}

/// Total-ordered f64 wrapper so scores can live in a binary heap.
#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Grid cell addressed by steps from the start point.
type CellKey = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    key: CellKey,
    g_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Route planner over a flight cage and a set of obstacles.
#[derive(Debug, Clone)]
pub struct PathFinder {
    cage: Vec<[f64; 2]>,
    obstacles: Vec<Obstacle>,
    resolution_m: f64,
}

impl PathFinder {
    pub fn new(
        cage: Vec<[f64; 2]>,
        obstacles: Vec<Obstacle>,
        resolution_m: f64,
    ) -> Result<Self, GeofenceError> {
        if cage.len() < 3 {
            return Err(GeofenceError::TooFewVertices(cage.len()));
        }
        let resolution_m = if resolution_m > 0.0 {
            resolution_m
        } else {
            DEFAULT_RESOLUTION_M
        };

        tracing::info!(
            obstacles = obstacles.len(),
            resolution_m,
            "path finder initialised"
        );

        Ok(Self {
            cage,
            obstacles,
            resolution_m,
        })
    }

    /// Build a planner from a loaded flight map.
    pub fn from_map(map: &FlightMap, resolution_m: f64) -> Result<Self, GeofenceError> {
        let obstacles = map
            .obstacles
            .iter()
            .map(|obstacle| Obstacle::new(obstacle.points.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(map.geocage.clone(), obstacles, resolution_m)
    }

    pub fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    /// True when the point is inside the cage and clear of every obstacle
    /// margin.
    pub fn is_valid(&self, x: f64, y: f64) -> bool {
        if !point_in_polygon(x, y, &self.cage) {
            return false;
        }
        !self.obstacles.iter().any(|obstacle| obstacle.near(x, y))
    }

    /// Classify a point for error reporting.
    pub fn classify(&self, x: f64, y: f64) -> PointClass {
        if !point_in_polygon(x, y, &self.cage) {
            PointClass::OutsideCage
        } else if self.obstacles.iter().any(|obstacle| obstacle.near(x, y)) {
            PointClass::NearObstacle
        } else {
            PointClass::Safe
        }
    }

    /// Check that the straight segment between two points never leaves the
    /// valid region, sampling at half the grid resolution.
    pub fn line_clear(&self, from: [f64; 3], to: [f64; 3]) -> bool {
        let horizontal = distance_2d([from[0], from[1]], [to[0], to[1]]);
        let num_checks = ((horizontal / (self.resolution_m * 0.5)).ceil() as usize).max(2);

        for i in 0..=num_checks {
            let t = i as f64 / num_checks as f64;
            let x = from[0] + t * (to[0] - from[0]);
            let y = from[1] + t * (to[1] - from[1]);
            if !self.is_valid(x, y) {
                return false;
            }
        }
        true
    }

    /// Find a waypoint path from `start` to `goal` avoiding obstacles.
    ///
    /// Returns `None` when either endpoint is invalid or the search gives
    /// up. The returned waypoints keep the start altitude.
    pub fn find_path(&self, start: [f64; 3], goal: [f64; 3]) -> Option<Vec<[f64; 3]>> {
        if !self.is_valid(start[0], start[1]) {
            tracing::warn!(?start, "path start is not a valid point");
            return None;
        }
        if !self.is_valid(goal[0], goal[1]) {
            tracing::warn!(?goal, "path goal is not a valid point");
            return None;
        }

        if self.obstacles.is_empty() {
            return Some(vec![start, goal]);
        }

        if self.line_clear(start, goal) {
            tracing::debug!("direct line is clear, skipping search");
            return Some(vec![start, goal]);
        }

        let path = self.astar(start, goal)?;
        tracing::debug!(waypoints = path.len(), "raw path found");
        let simplified = self.simplify(&path);
        tracing::debug!(waypoints = simplified.len(), "path simplified");
        Some(simplified)
    }

    fn cell_position(&self, start: [f64; 3], key: CellKey) -> [f64; 3] {
        [
            start[0] + key.0 as f64 * self.resolution_m,
            start[1] + key.1 as f64 * self.resolution_m,
            start[2],
        ]
    }

    fn astar(&self, start: [f64; 3], goal: [f64; 3]) -> Option<Vec<[f64; 3]>> {
        const NEIGHBORS: [(i32, i32); 8] = [
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];

        let start_key: CellKey = (0, 0);
        let heuristic = |key: CellKey| {
            let pos = self.cell_position(start, key);
            distance_2d([pos[0], pos[1]], [goal[0], goal[1]])
        };

        let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
        let mut g_score: HashMap<CellKey, f64> = HashMap::new();
        let mut came_from: HashMap<CellKey, CellKey> = HashMap::new();
        let mut closed_set: HashSet<CellKey> = HashSet::new();

        g_score.insert(start_key, 0.0);
        open_set.push(Reverse(OpenNode {
            key: start_key,
            g_score: FloatOrd(0.0),
            f_score: FloatOrd(heuristic(start_key)),
        }));

        let mut iterations = 0usize;

        while let Some(Reverse(current)) = open_set.pop() {
            if iterations >= MAX_ITERATIONS {
                break;
            }
            iterations += 1;

            if closed_set.contains(&current.key) {
                continue;
            }
            let best_g = g_score.get(&current.key).copied().unwrap_or(f64::INFINITY);
            if current.g_score.0 > best_g + 1e-9 {
                continue;
            }

            if heuristic(current.key) < self.resolution_m {
                return Some(self.reconstruct(start, &came_from, current.key));
            }

            closed_set.insert(current.key);

            for (dx, dy) in NEIGHBORS {
                let next_key = (current.key.0 + dx, current.key.1 + dy);
                if closed_set.contains(&next_key) {
                    continue;
                }

                let next_pos = self.cell_position(start, next_key);
                if !self.is_valid(next_pos[0], next_pos[1]) {
                    continue;
                }

                let step = self.resolution_m * ((dx * dx + dy * dy) as f64).sqrt();
                let tentative_g = best_g + step;
                if tentative_g < g_score.get(&next_key).copied().unwrap_or(f64::INFINITY) {
                    came_from.insert(next_key, current.key);
                    g_score.insert(next_key, tentative_g);
                    open_set.push(Reverse(OpenNode {
                        key: next_key,
                        g_score: FloatOrd(tentative_g),
                        f_score: FloatOrd(tentative_g + heuristic(next_key)),
                    }));
                }
            }
        }

        tracing::info!(iterations, "search ended without reaching the goal");
        None
    }

    fn reconstruct(
        &self,
        start: [f64; 3],
        came_from: &HashMap<CellKey, CellKey>,
        last: CellKey,
    ) -> Vec<[f64; 3]> {
        let mut keys = vec![last];
        let mut current = last;
        while let Some(&prev) = came_from.get(&current) {
            keys.push(prev);
            current = prev;
        }
        keys.reverse();
        keys.into_iter()
            .map(|key| self.cell_position(start, key))
            .collect()
    }

    /// Greedy waypoint skipping: from each kept point jump straight to the
    /// farthest point still in line of sight.
    fn simplify(&self, path: &[[f64; 3]]) -> Vec<[f64; 3]> {
        if path.len() <= 2 {
            return path.to_vec();
        }

        let mut simplified = vec![path[0]];
        let mut i = 0usize;

        while i < path.len() - 1 {
            let mut jumped = false;
            let mut j = path.len() - 1;
            while j > i + 1 {
                if self.line_clear(path[i], path[j]) {
                    simplified.push(path[j]);
                    i = j;
                    jumped = true;
                    break;
                }
                j -= 1;
            }
            if !jumped {
                i += 1;
                simplified.push(path[i]);
            }
        }

        if simplified.last() != path.last() {
            simplified.push(*path.last().unwrap());
        }
        simplified
    }

    /// Check a full waypoint list and try to repair the segments that cross
    /// obstacles.
    pub fn validate_mission(&self, waypoints: &[[f64; 3]]) -> MissionCheck {
        let mut problems = Vec::new();
        let mut corrected: Vec<[f64; 3]> = Vec::new();

        for (i, wp) in waypoints.iter().enumerate() {
            if !self.is_valid(wp[0], wp[1]) {
                problems.push(format!(
                    "waypoint {} is in a prohibited zone: ({:.2}, {:.2})",
                    i + 1,
                    wp[0],
                    wp[1]
                ));
            }
        }

        for i in 0..waypoints.len().saturating_sub(1) {
            if !self.line_clear(waypoints[i], waypoints[i + 1]) {
                problems.push(format!("segment {}-{} crosses an obstacle", i + 1, i + 2));

                if let Some(detour) = self.find_path(waypoints[i], waypoints[i + 1]) {
                    if i == 0 {
                        corrected.extend_from_slice(&detour[..detour.len() - 1]);
                    } else {
                        corrected.extend_from_slice(&detour[1..detour.len() - 1]);
                    }
                }
            }
        }

        if !problems.is_empty() && corrected.is_empty() {
            return MissionCheck {
                valid: false,
                problems,
                corrected: None,
            };
        }

        if !corrected.is_empty() {
            corrected.push(*waypoints.last().unwrap());
            return MissionCheck {
                valid: false,
                problems,
                corrected: Some(corrected),
            };
        }

        MissionCheck {
            valid: true,
            problems: Vec::new(),
            corrected: Some(waypoints.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cage() -> Vec<[f64; 2]> {
        vec![[-5.0, -5.0], [5.0, -5.0], [5.0, 5.0], [-5.0, 5.0]]
    }

    fn wall() -> Obstacle {
        // Thin wall across the middle of the cage, with gaps at the sides
        Obstacle::new(vec![[-3.0, -0.3], [3.0, -0.3], [3.0, 0.3], [-3.0, 0.3]]).unwrap()
    }

    #[test]
    fn obstacle_needs_three_vertices() {
        assert!(Obstacle::new(vec![[0.0, 0.0], [1.0, 0.0]]).is_err());
    }

    #[test]
    fn obstacle_margin_extends_reach() {
        let obstacle = wall();
        assert!(obstacle.contains(0.0, 0.0));
        assert!(!obstacle.contains(0.0, 0.5));
        // Within the 0.3 m margin of the top edge
        assert!(obstacle.near(0.0, 0.5));
        assert!(!obstacle.near(0.0, 0.7));
    }

    #[test]
    fn direct_path_without_obstacles() {
        let finder = PathFinder::new(cage(), Vec::new(), DEFAULT_RESOLUTION_M).unwrap();
        let path = finder
            .find_path([-4.0, -4.0, 0.5], [4.0, 4.0, 0.5])
            .unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], [-4.0, -4.0, 0.5]);
        assert_eq!(path[1], [4.0, 4.0, 0.5]);
    }

    #[test]
    fn direct_path_when_line_misses_obstacle() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        // Straight line along x = 4 never touches the wall (it spans x in [-3, 3])
        let path = finder.find_path([4.0, -4.0, 0.5], [4.0, 4.0, 0.5]).unwrap();
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn no_path_when_start_outside_cage() {
        let finder = PathFinder::new(cage(), Vec::new(), DEFAULT_RESOLUTION_M).unwrap();
        assert!(finder.find_path([-9.0, 0.0, 0.5], [0.0, 0.0, 0.5]).is_none());
        assert!(finder.find_path([0.0, 0.0, 0.5], [9.0, 0.0, 0.5]).is_none());
    }

    #[test]
    fn no_path_when_goal_inside_obstacle_margin() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        assert!(finder.find_path([0.0, -4.0, 0.5], [0.0, 0.4, 0.5]).is_none());
    }

    #[test]
    fn routes_around_obstacle() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        let start = [0.0, -3.0, 0.5];
        let goal = [0.0, 3.0, 0.5];
        let path = finder.find_path(start, goal).unwrap();

        assert!(path.len() >= 3, "detour expected, got {path:?}");
        assert_eq!(path[0], start);
        let last = path.last().unwrap();
        let goal_dist = ((last[0] - goal[0]).powi(2) + (last[1] - goal[1]).powi(2)).sqrt();
        assert!(goal_dist < DEFAULT_RESOLUTION_M);

        // Every simplified segment must stay clear of the obstacle
        for pair in path.windows(2) {
            assert!(finder.line_clear(pair[0], pair[1]));
        }
        // Altitude is carried through unchanged
        assert!(path.iter().all(|wp| (wp[2] - 0.5).abs() < 1e-9));
    }

    #[test]
    fn classify_reports_reason() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        assert_eq!(finder.classify(4.0, 4.0), PointClass::Safe);
        assert_eq!(finder.classify(8.0, 0.0), PointClass::OutsideCage);
        assert_eq!(finder.classify(0.0, 0.0), PointClass::NearObstacle);
    }

    #[test]
    fn validate_mission_flags_bad_waypoints() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        let check = finder.validate_mission(&[[0.0, -3.0, 0.5], [8.0, 0.0, 0.5]]);
        assert!(!check.valid);
        assert!(!check.problems.is_empty());
    }

    #[test]
    fn validate_mission_repairs_crossing_segment() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        let check = finder.validate_mission(&[[0.0, -3.0, 0.5], [0.0, 3.0, 0.5]]);
        assert!(!check.valid);
        let corrected = check.corrected.expect("detour should exist");
        assert!(corrected.len() > 2);
        assert_eq!(*corrected.last().unwrap(), [0.0, 3.0, 0.5]);
    }

    #[test]
    fn validate_mission_accepts_clean_route() {
        let finder =
            PathFinder::new(cage(), vec![wall()], DEFAULT_RESOLUTION_M).unwrap();
        let waypoints = [[4.0, -4.0, 0.5], [4.0, 4.0, 0.5]];
        let check = finder.validate_mission(&waypoints);
        assert!(check.valid);
        assert_eq!(check.corrected.unwrap(), waypoints.to_vec());
    }
}
