//! Kinematic link simulator.
//!
//! Integrates commanded motion at the controller tick so the whole runtime
//! can be exercised without a radio. Deterministic by default; position
//! noise and battery drain are configurable.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::body_to_room;
use crate::link::{DeckInventory, DroneLink, FlowDelta, LinkError, RangerSample, RawSample};

/// Simulator tuning knobs.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub start_battery_v: f64,
    pub battery_drain_vps: f64,
    /// Uniform position noise amplitude, meters. Zero disables noise.
    pub position_noise_m: f64,
    pub flow_deck: bool,
    pub multiranger_deck: bool,
    /// Make `deck_inventory` fail, to exercise the downgrade path.
    pub fail_deck_query: bool,
    pub seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            start_battery_v: 4.1,
            battery_drain_vps: 0.0002,
            position_noise_m: 0.0,
            flow_deck: true,
            multiranger_deck: false,
            fail_deck_query: false,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Setpoint {
    Idle,
    Linear {
        vx: f64,
        vy: f64,
        vz: f64,
        yaw_rate: f64,
    },
    MoveTo {
        target: [f64; 3],
        speed: f64,
    },
    Climb {
        target_z: f64,
        speed: f64,
    },
    Descend {
        speed: f64,
    },
}

/// Simulated drone link, room frame internally.
pub struct SimLink {
    params: SimParams,
    rng: StdRng,
    position: [f64; 3],
    velocity: [f64; 3],
    yaw_deg: f64,
    battery_v: f64,
    airborne: bool,
    setpoint: Setpoint,
}

impl SimLink {
    pub fn new(params: SimParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        let battery_v = params.start_battery_v;
        Self {
            params,
            rng,
            position: [0.0; 3],
            velocity: [0.0; 3],
            yaw_deg: 0.0,
            battery_v,
            airborne: false,
            setpoint: Setpoint::Idle,
        }
    }

    /// Teleport the vehicle, for test setup.
    pub fn place_at(&mut self, position: [f64; 3]) {
        self.position = position;
        self.airborne = position[2] > 0.0;
    }

    fn noise(&mut self) -> f64 {
        let amplitude = self.params.position_noise_m;
        if amplitude <= 0.0 {
            0.0
        } else {
            self.rng.random_range(-amplitude..amplitude)
        }
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl DroneLink for SimLink {
    fn take_off(&mut self, height_m: f64, velocity_mps: f64) -> Result<(), LinkError> {
        self.airborne = true;
        self.setpoint = Setpoint::Climb {
            target_z: height_m,
            speed: velocity_mps.max(0.05),
        };
        Ok(())
    }

    fn land(&mut self, velocity_mps: f64) -> Result<(), LinkError> {
        self.setpoint = Setpoint::Descend {
            speed: velocity_mps.max(0.05),
        };
        Ok(())
    }

    fn stop(&mut self) -> Result<(), LinkError> {
        self.setpoint = Setpoint::Idle;
        self.velocity = [0.0; 3];
        Ok(())
    }

    fn start_linear_motion(
        &mut self,
        vx_mps: f64,
        vy_mps: f64,
        vz_mps: f64,
        yaw_rate_dps: f64,
    ) -> Result<(), LinkError> {
        if !self.airborne {
            return Err(LinkError::NotAirborne);
        }
        self.setpoint = Setpoint::Linear {
            vx: vx_mps,
            vy: vy_mps,
            vz: vz_mps,
            yaw_rate: yaw_rate_dps,
        };
        Ok(())
    }

    fn move_distance(
        &mut self,
        dx_m: f64,
        dy_m: f64,
        dz_m: f64,
        velocity_mps: f64,
    ) -> Result<(), LinkError> {
        if !self.airborne {
            return Err(LinkError::NotAirborne);
        }
        let (wx, wy) = body_to_room(self.yaw_deg, dx_m, dy_m);
        let target = [
            self.position[0] + wx,
            self.position[1] + wy,
            (self.position[2] + dz_m).max(0.0),
        ];
        self.setpoint = Setpoint::MoveTo {
            target,
            speed: velocity_mps.max(0.05),
        };
        Ok(())
    }

    fn turn(&mut self, degrees: f64) -> Result<(), LinkError> {
        if !self.airborne {
            return Err(LinkError::NotAirborne);
        }
        self.yaw_deg = (self.yaw_deg + degrees).rem_euclid(360.0);
        Ok(())
    }

    fn reset_estimator(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn sample(&mut self) -> Result<RawSample, LinkError> {
        let noise = [self.noise(), self.noise(), self.noise()];
        let position = [
            self.position[0] + noise[0],
            self.position[1] + noise[1],
            (self.position[2] + noise[2]).max(0.0),
        ];

        Ok(RawSample {
            // Raw estimator frame: lateral axis and yaw flipped
            position: [position[0], -position[1], position[2]],
            velocity: [self.velocity[0], -self.velocity[1], self.velocity[2]],
            attitude: [0.0, 0.0, -self.yaw_deg],
            battery_v: self.battery_v,
            zrange_alt_m: self.params.flow_deck.then_some(position[2]),
            flow: self.params.flow_deck.then(|| FlowDelta {
                delta_x: (self.velocity[0] * 100.0) as i16,
                delta_y: (self.velocity[1] * 100.0) as i16,
            }),
            ranger: self.params.multiranger_deck.then(|| RangerSample {
                front_m: 2.0,
                back_m: 2.0,
                left_m: 2.0,
                right_m: 2.0,
            }),
        })
    }

    fn deck_inventory(&mut self) -> Result<DeckInventory, LinkError> {
        if self.params.fail_deck_query {
            return Err(LinkError::DeckQuery("deck parameter read failed".to_string()));
        }
        Ok(DeckInventory {
            flow: self.params.flow_deck,
            multiranger: self.params.multiranger_deck,
        })
    }

    fn advance(&mut self, dt: Duration) {
        let dt_s = dt.as_secs_f64();
        if dt_s <= 0.0 {
            return;
        }

        self.battery_v = (self.battery_v - self.params.battery_drain_vps * dt_s).max(3.0);

        match self.setpoint {
            Setpoint::Idle => {
                self.velocity = [0.0; 3];
            }
            Setpoint::Linear {
                vx,
                vy,
                vz,
                yaw_rate,
            } => {
                self.yaw_deg = (self.yaw_deg + yaw_rate * dt_s).rem_euclid(360.0);
                let (wx, wy) = body_to_room(self.yaw_deg, vx, vy);
                self.velocity = [wx, wy, vz];
                self.position[0] += wx * dt_s;
                self.position[1] += wy * dt_s;
                self.position[2] = (self.position[2] + vz * dt_s).max(0.0);
            }
            Setpoint::MoveTo { target, speed } => {
                let delta = [
                    target[0] - self.position[0],
                    target[1] - self.position[1],
                    target[2] - self.position[2],
                ];
                let dist =
                    (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
                let step = speed * dt_s;
                if dist <= step || dist < 1e-9 {
                    self.position = target;
                    self.velocity = [0.0; 3];
                    self.setpoint = Setpoint::Idle;
                } else {
                    let scale = step / dist;
                    self.position[0] += delta[0] * scale;
                    self.position[1] += delta[1] * scale;
                    self.position[2] += delta[2] * scale;
                    self.velocity = [
                        delta[0] / dist * speed,
                        delta[1] / dist * speed,
                        delta[2] / dist * speed,
                    ];
                }
            }
            Setpoint::Climb { target_z, speed } => {
                let remaining = target_z - self.position[2];
                let step = speed * dt_s;
                if remaining.abs() <= step {
                    self.position[2] = target_z;
                    self.velocity = [0.0; 3];
                    self.setpoint = Setpoint::Idle;
                } else {
                    let dz = step * remaining.signum();
                    self.position[2] += dz;
                    self.velocity = [0.0, 0.0, speed * remaining.signum()];
                }
            }
            Setpoint::Descend { speed } => {
                let step = speed * dt_s;
                if self.position[2] <= step {
                    self.position[2] = 0.0;
                    self.velocity = [0.0; 3];
                    self.airborne = false;
                    self.setpoint = Setpoint::Idle;
                } else {
                    self.position[2] -= step;
                    self.velocity = [0.0, 0.0, -speed];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_for(link: &mut SimLink, secs: f64) {
        let steps = (secs / 0.05).round() as usize;
        for _ in 0..steps {
            link.advance(Duration::from_millis(50));
        }
    }

    #[test]
    fn takeoff_reaches_target_height() {
        let mut link = SimLink::default();
        link.take_off(0.5, 0.3).unwrap();
        advance_for(&mut link, 3.0);
        let sample = link.sample().unwrap();
        assert!((sample.position[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn move_distance_round_trips_through_frames() {
        let mut link = SimLink::default();
        link.take_off(0.5, 0.3).unwrap();
        advance_for(&mut link, 3.0);
        link.turn(90.0).unwrap();
        // Body-forward at heading 90 moves along room +y
        link.move_distance(1.0, 0.0, 0.0, 0.5).unwrap();
        advance_for(&mut link, 5.0);

        let sample = link.sample().unwrap();
        assert!(sample.position[0].abs() < 1e-6);
        // Raw frame flips the lateral axis
        assert!((sample.position[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn linear_motion_requires_airborne() {
        let mut link = SimLink::default();
        assert!(matches!(
            link.start_linear_motion(0.1, 0.0, 0.0, 0.0),
            Err(LinkError::NotAirborne)
        ));
    }

    #[test]
    fn land_returns_to_ground() {
        let mut link = SimLink::default();
        link.take_off(0.8, 0.3).unwrap();
        advance_for(&mut link, 4.0);
        link.land(0.3).unwrap();
        advance_for(&mut link, 4.0);
        let sample = link.sample().unwrap();
        assert_eq!(sample.position[2], 0.0);
        assert!(matches!(
            link.start_linear_motion(0.1, 0.0, 0.0, 0.0),
            Err(LinkError::NotAirborne)
        ));
    }

    #[test]
    fn deck_query_failure_is_reported() {
        let mut link = SimLink::new(SimParams {
            fail_deck_query: true,
            ..SimParams::default()
        });
        assert!(link.deck_inventory().is_err());
    }

    #[test]
    fn missing_decks_drop_their_samples() {
        let mut link = SimLink::new(SimParams {
            flow_deck: false,
            multiranger_deck: false,
            ..SimParams::default()
        });
        let sample = link.sample().unwrap();
        assert!(sample.flow.is_none());
        assert!(sample.zrange_alt_m.is_none());
        assert!(sample.ranger.is_none());
    }
}
