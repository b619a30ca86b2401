//! Active fence set and periodic enforcement.
//!
//! The supervisor owns whichever fences are armed, vetoes target positions
//! for moves, and runs the watchdog cadence: the rectangular fence is
//! checked every 0.2 s, the polygon fence every 0.3 s, only while flying.
//! Altitude fences are check-only, they veto but never move the vehicle.

use std::time::Duration;

use gcs_core::geofence::{AltitudeFence, BreachAction, PolygonFence, RectFence};

use crate::events::FenceKind;

/// Hysteresis around the rectangle before a correction fires, meters.
const RECT_BUFFER_M: f64 = 0.1;

/// Hysteresis on the distance back to the polygon's safe region, meters.
const POLYGON_BUFFER_M: f64 = 0.2;

/// Correction overshoot factor so the vehicle ends up inside, not on the
/// edge.
const CORRECTION_GAIN: f64 = 1.1;

/// What the watchdog decided for one fence this round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FenceDecision {
    /// Room-frame corrective displacement back toward the safe region.
    Correct {
        fence: FenceKind,
        dx: f64,
        dy: f64,
    },
    /// Breach configured to land or return instead of correcting.
    Descend {
        fence: FenceKind,
        action: BreachAction,
    },
}

/// The armed fences plus watchdog bookkeeping.
#[derive(Debug, Default)]
pub struct FenceSupervisor {
    rect: Option<(RectFence, BreachAction)>,
    polygon: Option<(PolygonFence, BreachAction)>,
    altitude: AltitudeFence,
    rect_period: Duration,
    polygon_period: Duration,
    rect_elapsed: Duration,
    polygon_elapsed: Duration,
}

impl FenceSupervisor {
    pub fn new(rect_period: Duration, polygon_period: Duration) -> Self {
        Self {
            rect_period,
            polygon_period,
            ..Self::default()
        }
    }

    pub fn set_rect(&mut self, fence: RectFence, action: BreachAction) {
        tracing::info!(?fence, ?action, "rectangular fence armed");
        self.rect = Some((fence, action));
        self.rect_elapsed = Duration::ZERO;
    }

    pub fn clear_rect(&mut self) {
        self.rect = None;
    }

    pub fn set_polygon(&mut self, fence: PolygonFence, action: BreachAction) {
        tracing::info!(?action, "polygon fence armed");
        self.polygon = Some((fence, action));
        self.polygon_elapsed = Duration::ZERO;
    }

    pub fn clear_polygon(&mut self) {
        self.polygon = None;
    }

    pub fn set_floor(&mut self, altitude_m: f64) {
        self.altitude.floor_m = Some(altitude_m);
    }

    pub fn clear_floor(&mut self) {
        self.altitude.floor_m = None;
    }

    pub fn set_ceiling(&mut self, altitude_m: f64) {
        self.altitude.ceiling_m = Some(altitude_m);
    }

    pub fn clear_ceiling(&mut self) {
        self.altitude.ceiling_m = None;
    }

    pub fn altitude(&self) -> &AltitudeFence {
        &self.altitude
    }

    /// Check a candidate target position against every armed fence.
    /// Used before goto/move/nav/RC motion; boundary counts as violation.
    pub fn target_violation(&self, x: f64, y: f64, z: f64) -> Option<FenceKind> {
        if let Some((fence, _)) = &self.rect {
            if fence.violates(x, y) {
                return Some(FenceKind::Rect);
            }
        }
        if let Some((fence, _)) = &self.polygon {
            if !fence.contains(x, y) {
                return Some(FenceKind::Polygon);
            }
        }
        if self.altitude.below_floor(z) {
            return Some(FenceKind::Floor);
        }
        if self.altitude.above_ceiling(z) {
            return Some(FenceKind::Ceiling);
        }
        None
    }

    /// Advance the watchdog clocks and evaluate whichever fences are due.
    ///
    /// `flying` gates enforcement: the cadence clocks still run, but no
    /// decision is produced while the vehicle is not flying.
    pub fn tick(&mut self, dt: Duration, flying: bool, position: [f64; 3]) -> Vec<FenceDecision> {
        let mut decisions = Vec::new();

        self.rect_elapsed += dt;
        if self.rect_elapsed >= self.rect_period {
            self.rect_elapsed = Duration::ZERO;
            if flying {
                if let Some(decision) = self.check_rect(position) {
                    decisions.push(decision);
                }
            }
        }

        self.polygon_elapsed += dt;
        if self.polygon_elapsed >= self.polygon_period {
            self.polygon_elapsed = Duration::ZERO;
            if flying {
                if let Some(decision) = self.check_polygon(position) {
                    decisions.push(decision);
                }
            }
        }

        decisions
    }

    fn check_rect(&self, position: [f64; 3]) -> Option<FenceDecision> {
        let (fence, action) = self.rect.as_ref()?;
        let (excess_x, excess_y) = fence.excess(position[0], position[1]);

        if excess_x.abs() < RECT_BUFFER_M && excess_y.abs() < RECT_BUFFER_M {
            return None;
        }

        tracing::warn!(excess_x, excess_y, "outside rectangular fence");
        Some(match action {
            BreachAction::Correct => FenceDecision::Correct {
                fence: FenceKind::Rect,
                dx: -excess_x * CORRECTION_GAIN,
                dy: -excess_y * CORRECTION_GAIN,
            },
            other => FenceDecision::Descend {
                fence: FenceKind::Rect,
                action: *other,
            },
        })
    }

    fn check_polygon(&self, position: [f64; 3]) -> Option<FenceDecision> {
        let (fence, action) = self.polygon.as_ref()?;
        if fence.contains(position[0], position[1]) {
            return None;
        }

        let (nearest, dist) = fence.nearest_safe_point(position[0], position[1]);
        if dist < POLYGON_BUFFER_M {
            return None;
        }

        tracing::warn!(dist, "outside polygon fence safe region");
        Some(match action {
            BreachAction::Correct => FenceDecision::Correct {
                fence: FenceKind::Polygon,
                dx: (nearest[0] - position[0]) * CORRECTION_GAIN,
                dy: (nearest[1] - position[1]) * CORRECTION_GAIN,
            },
            other => FenceDecision::Descend {
                fence: FenceKind::Polygon,
                action: *other,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> FenceSupervisor {
        FenceSupervisor::new(Duration::from_millis(200), Duration::from_millis(300))
    }

    #[test]
    fn target_violation_checks_every_fence() {
        let mut sup = supervisor();
        sup.set_rect(RectFence::new(2.0, 2.0).unwrap(), BreachAction::Correct);
        sup.set_floor(0.3);
        sup.set_ceiling(2.0);

        assert_eq!(sup.target_violation(0.0, 0.0, 1.0), None);
        assert_eq!(sup.target_violation(2.5, 0.0, 1.0), Some(FenceKind::Rect));
        assert_eq!(sup.target_violation(0.0, 0.0, 0.2), Some(FenceKind::Floor));
        assert_eq!(
            sup.target_violation(0.0, 0.0, 2.5),
            Some(FenceKind::Ceiling)
        );
    }

    #[test]
    fn rect_watchdog_waits_for_its_period() {
        let mut sup = supervisor();
        sup.set_rect(RectFence::new(2.0, 2.0).unwrap(), BreachAction::Correct);

        let early = sup.tick(Duration::from_millis(50), true, [3.0, 0.0, 0.5]);
        assert!(early.is_empty());

        let due = sup.tick(Duration::from_millis(150), true, [3.0, 0.0, 0.5]);
        assert_eq!(due.len(), 1);
        match due[0] {
            FenceDecision::Correct { fence, dx, dy } => {
                assert_eq!(fence, FenceKind::Rect);
                assert!((dx + 1.1).abs() < 1e-9);
                assert_eq!(dy, 0.0);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn rect_watchdog_ignores_buffer_zone() {
        let mut sup = supervisor();
        sup.set_rect(RectFence::new(2.0, 2.0).unwrap(), BreachAction::Correct);

        // 5 cm beyond the limit: within the 10 cm buffer
        let decisions = sup.tick(Duration::from_millis(200), true, [2.05, 0.0, 0.5]);
        assert!(decisions.is_empty());
    }

    #[test]
    fn watchdog_idle_when_not_flying() {
        let mut sup = supervisor();
        sup.set_rect(RectFence::new(2.0, 2.0).unwrap(), BreachAction::Correct);
        let decisions = sup.tick(Duration::from_millis(400), false, [5.0, 0.0, 0.5]);
        assert!(decisions.is_empty());
    }

    #[test]
    fn polygon_breach_with_rtl_action_descends() {
        let boundary = vec![[-2.0, -2.0], [2.0, -2.0], [2.0, 2.0], [-2.0, 2.0]];
        let mut sup = supervisor();
        sup.set_polygon(
            PolygonFence::new(boundary, Vec::new()).unwrap(),
            BreachAction::Rtl,
        );

        let decisions = sup.tick(Duration::from_millis(300), true, [0.0, 3.0, 0.5]);
        assert_eq!(
            decisions,
            vec![FenceDecision::Descend {
                fence: FenceKind::Polygon,
                action: BreachAction::Rtl,
            }]
        );
    }

    #[test]
    fn polygon_correction_points_back_inside() {
        let boundary = vec![[-2.0, -2.0], [2.0, -2.0], [2.0, 2.0], [-2.0, 2.0]];
        let mut sup = supervisor();
        sup.set_polygon(
            PolygonFence::new(boundary, Vec::new()).unwrap(),
            BreachAction::Correct,
        );

        let decisions = sup.tick(Duration::from_millis(300), true, [0.0, 3.0, 0.5]);
        match decisions[0] {
            FenceDecision::Correct { fence, dx, dy } => {
                assert_eq!(fence, FenceKind::Polygon);
                assert!(dx.abs() < 1e-9);
                // Nearest boundary point is (0, 2): one meter back, 1.1 gain
                assert!((dy + 1.1).abs() < 1e-9);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }
}
