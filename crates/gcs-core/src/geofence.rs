//! Geofence models and containment checks.
//!
//! Three fence shapes watch the vehicle: an axis-aligned rectangle centred
//! on the origin, a polygon with optional exclusion holes, and independent
//! altitude floor/ceiling bounds. The runtime decides what to do on a
//! breach via [`BreachAction`].

use serde::{Deserialize, Serialize};

use crate::error::GeofenceError;
use crate::geometry::{nearest_point_on_ring, point_in_polygon};

/// Response to a geofence breach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachAction {
    /// Nudge the vehicle back toward the nearest safe point.
    #[default]
    Correct,
    /// Land in place.
    Land,
    /// Return to launch, then land.
    Rtl,
}

/// Axis-aligned rectangular fence centred on the origin.
///
/// `x_limit_m` bounds forward/backward travel, `y_limit_m` lateral travel;
/// both are half-extents and must be at least 1 m.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectFence {
    pub x_limit_m: f64,
    pub y_limit_m: f64,
}

impl RectFence {
    pub fn new(x_limit_m: f64, y_limit_m: f64) -> Result<Self, GeofenceError> {
        let x = x_limit_m.abs();
        let y = y_limit_m.abs();
        if x < 1.0 || y < 1.0 {
            return Err(GeofenceError::LimitTooSmall(x, y));
        }
        Ok(Self {
            x_limit_m: x,
            y_limit_m: y,
        })
    }

    /// Boundary-inclusive violation check: on or beyond either limit.
    pub fn violates(&self, x: f64, y: f64) -> bool {
        x.abs() >= self.x_limit_m || y.abs() >= self.y_limit_m
    }

    /// Signed overshoot beyond each limit, zero while inside.
    pub fn excess(&self, x: f64, y: f64) -> (f64, f64) {
        let excess_x = if x > self.x_limit_m {
            x - self.x_limit_m
        } else if x < -self.x_limit_m {
            x + self.x_limit_m
        } else {
            0.0
        };

        let excess_y = if y > self.y_limit_m {
            y - self.y_limit_m
        } else if y < -self.y_limit_m {
            y + self.y_limit_m
        } else {
            0.0
        };

        (excess_x, excess_y)
    }
}

/// Polygonal fence: a boundary ring minus a set of exclusion holes.
///
/// The flyable region is the interior of `boundary` with every hole
/// subtracted. Holes with fewer than 3 vertices are discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonFence {
    boundary: Vec<[f64; 2]>,
    holes: Vec<Vec<[f64; 2]>>,
}

impl PolygonFence {
    pub fn new(
        boundary: Vec<[f64; 2]>,
        holes: Vec<Vec<[f64; 2]>>,
    ) -> Result<Self, GeofenceError> {
        if boundary.len() < 3 {
            return Err(GeofenceError::TooFewVertices(boundary.len()));
        }

        let holes = holes
            .into_iter()
            .filter(|hole| {
                if hole.len() < 3 {
                    tracing::warn!("discarding exclusion hole with {} vertices", hole.len());
                    false
                } else {
                    true
                }
            })
            .collect();

        Ok(Self { boundary, holes })
    }

    pub fn boundary(&self) -> &[[f64; 2]] {
        &self.boundary
    }

    pub fn holes(&self) -> &[Vec<[f64; 2]>] {
        &self.holes
    }

    /// True when `(x, y)` lies in the flyable region.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        point_in_polygon(x, y, &self.boundary) && self.violated_hole(x, y).is_none()
    }

    /// Index of the exclusion hole containing the point, if any.
    pub fn violated_hole(&self, x: f64, y: f64) -> Option<usize> {
        self.holes
            .iter()
            .position(|hole| point_in_polygon(x, y, hole))
    }

    /// Closest point of the flyable region to an outside point, with its
    /// distance. For a point inside a hole this is the hole's edge, for a
    /// point outside the boundary it is the boundary's edge.
    pub fn nearest_safe_point(&self, x: f64, y: f64) -> ([f64; 2], f64) {
        let ring: &[[f64; 2]] = match self.violated_hole(x, y) {
            Some(idx) => &self.holes[idx],
            None => &self.boundary,
        };
        // Rings have >= 3 vertices by construction
        nearest_point_on_ring(x, y, ring).unwrap_or(([x, y], 0.0))
    }
}

/// Independent altitude floor and ceiling bounds.
///
/// Either bound may be absent. Checks are boundary-inclusive, matching the
/// horizontal fences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AltitudeFence {
    pub floor_m: Option<f64>,
    pub ceiling_m: Option<f64>,
}

impl AltitudeFence {
    pub fn new(floor_m: Option<f64>, ceiling_m: Option<f64>) -> Result<Self, GeofenceError> {
        if let (Some(floor), Some(ceiling)) = (floor_m, ceiling_m) {
            if floor >= ceiling {
                return Err(GeofenceError::InvertedAltitudeBand {
                    floor_m: floor,
                    ceiling_m: ceiling,
                });
            }
        }
        Ok(Self { floor_m, ceiling_m })
    }

    pub fn below_floor(&self, alt_m: f64) -> bool {
        self.floor_m.map(|floor| alt_m <= floor).unwrap_or(false)
    }

    pub fn above_ceiling(&self, alt_m: f64) -> bool {
        self.ceiling_m
            .map(|ceiling| alt_m >= ceiling)
            .unwrap_or(false)
    }

    pub fn violates(&self, alt_m: f64) -> bool {
        self.below_floor(alt_m) || self.above_ceiling(alt_m)
    }
}
