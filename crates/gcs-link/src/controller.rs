//! The control loop: one task owns the link and all vehicle state.
//!
//! Callers hold a [`Drone`] handle and send [`DroneCommand`]s over a
//! bounded queue. The loop ticks at a fixed rate, advancing the active
//! maneuver, running the geofence watchdogs and publishing telemetry.
//! Long actions never block the loop; they are tick-driven state with
//! deadlines, and a new command simply replaces the active maneuver.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};

use gcs_core::geofence::BreachAction;
use gcs_core::mission::{Direction, Mission};

use crate::command::DroneCommand;
use crate::events::{DroneEvent, FenceKind, ManeuverKind, RejectReason};
use crate::fence::{FenceDecision, FenceSupervisor};
use crate::frame::{
    body_to_room, normalize_heading, raw_to_room_attitude, raw_to_room_position, room_to_body,
    shortest_heading_delta,
};
use crate::link::{DroneLink, LinkError, RawSample};
use crate::rc::RcFrame;
use crate::state::{FlightState, TelemetrySnapshot, VehicleState};

/// Vertical band accepted as "at takeoff altitude" / arrival tolerance.
const ARRIVAL_TOLERANCE_M: f64 = 0.4;
/// Below this delta a goto is already in position.
const GOTO_MIN_DELTA_M: f64 = 0.15;
/// Altitude-change acceptance band.
const ALTITUDE_BAND_M: f64 = 0.3;
/// Altitude deltas smaller than this are not worth moving for.
const ALTITUDE_MIN_DELTA_M: f64 = 0.1;
const TAKEOFF_TIMEOUT: Duration = Duration::from_secs(5);
const GOTO_TIMEOUT: Duration = Duration::from_secs(3);
const MOVE_TIMEOUT: Duration = Duration::from_secs(5);
const ALTITUDE_TIMEOUT: Duration = Duration::from_secs(3);
const RTL_TIMEOUT: Duration = Duration::from_secs(6);
/// Continuous motion looks this far ahead when predicting fence breaches.
const LOOKAHEAD_S: f64 = 0.4;
/// Headings closer than this are not corrected.
const HEADING_DEADBAND_DEG: f64 = 5.0;
/// Below this the throttle stick cannot command a descent.
const GROUND_GUARD_M: f64 = 0.05;
/// Below this altitude the vehicle counts as landed.
const LANDED_ALT_M: f64 = 0.05;

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_CHANNEL_DEPTH: usize = 64;

/// Controller tuning. Defaults match the cadences and speeds the vehicle
/// is flown with indoors.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick: Duration,
    pub telemetry_hz: f64,
    pub rect_fence_period: Duration,
    pub polygon_fence_period: Duration,
    pub nav_speed_mps: f64,
    pub move_speed_mps: f64,
    pub waypoint_pause: Duration,
    pub rotation_pause: Duration,
    pub rc_horizontal_mps: f64,
    pub rc_vertical_mps: f64,
    pub rc_yaw_rate_dps: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            telemetry_hz: 4.0,
            rect_fence_period: Duration::from_millis(200),
            polygon_fence_period: Duration::from_millis(300),
            nav_speed_mps: 0.2,
            move_speed_mps: 0.3,
            waypoint_pause: Duration::from_millis(300),
            rotation_pause: Duration::from_millis(500),
            rc_horizontal_mps: 0.3,
            rc_vertical_mps: 0.2,
            rc_yaw_rate_dps: 20.0,
        }
    }
}

/// The controller task has stopped and can no longer accept commands.
#[derive(Debug, Error)]
#[error("controller task is gone")]
pub struct ControllerGone;

/// Handle to a running controller task.
#[derive(Clone)]
pub struct Drone {
    commands: mpsc::Sender<DroneCommand>,
    events: broadcast::Sender<DroneEvent>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
}

impl Drone {
    /// Spawn the controller task over a connected link.
    pub fn spawn(link: impl DroneLink + 'static, config: ControllerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySnapshot::default());

        let controller = Controller::new(link, config, event_tx.clone(), telemetry_tx);
        tokio::spawn(controller.run(command_rx));

        Self {
            commands: command_tx,
            events: event_tx,
            telemetry: telemetry_rx,
        }
    }

    /// Send a raw command to the controller.
    pub async fn send(&self, command: DroneCommand) -> Result<(), ControllerGone> {
        self.commands.send(command).await.map_err(|_| ControllerGone)
    }

    /// Subscribe to controller events.
    pub fn events(&self) -> broadcast::Receiver<DroneEvent> {
        self.events.subscribe()
    }

    /// Latest telemetry snapshot channel.
    pub fn telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.clone()
    }

    pub async fn arm(&self) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Arm).await
    }

    pub async fn take_off(&self, altitude_m: f64) -> Result<(), ControllerGone> {
        self.send(DroneCommand::TakeOff { altitude_m }).await
    }

    pub async fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Goto { x, y, z }).await
    }

    pub async fn move_distance(
        &self,
        direction: Direction,
        distance_m: f64,
    ) -> Result<(), ControllerGone> {
        self.send(DroneCommand::MoveDistance {
            direction,
            distance_m,
        })
        .await
    }

    pub async fn go(&self, direction: Direction) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Nav { direction }).await
    }

    pub async fn halt(&self) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Halt).await
    }

    pub async fn change_heading(&self, degrees: f64) -> Result<(), ControllerGone> {
        self.send(DroneCommand::ChangeHeading { degrees }).await
    }

    pub async fn change_altitude(&self, altitude_m: f64) -> Result<(), ControllerGone> {
        self.send(DroneCommand::ChangeAltitude { altitude_m }).await
    }

    pub async fn rtl(&self) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Rtl).await
    }

    pub async fn land(&self) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Land).await
    }

    pub async fn send_rc(&self, frame: RcFrame) -> Result<(), ControllerGone> {
        self.send(DroneCommand::SendRc(frame)).await
    }

    pub async fn run_mission(&self, mission: Mission) -> Result<(), ControllerGone> {
        self.send(DroneCommand::RunMission { mission }).await
    }

    pub async fn shutdown(&self) -> Result<(), ControllerGone> {
        self.send(DroneCommand::Shutdown).await
    }
}

/// Tick-driven long action.
#[derive(Debug)]
enum Maneuver {
    Idle,
    TakingOff {
        target_m: f64,
        deadline: Instant,
    },
    Goto {
        target: [f64; 3],
        deadline: Instant,
        kind: ManeuverKind,
    },
    ChangingAltitude {
        target_m: f64,
        deadline: Instant,
    },
    Returning {
        deadline: Instant,
    },
    Landing {
        kind: ManeuverKind,
    },
    Mission(MissionRun),
}

#[derive(Debug)]
struct MissionRun {
    mission: Mission,
    waypoint_index: usize,
    rotation_index: usize,
    phase: MissionPhase,
}

#[derive(Debug)]
enum MissionPhase {
    NextWaypoint,
    Travelling { target: [f64; 3], deadline: Instant },
    Pausing { until: Instant },
    NextRotation,
    RotationPause { until: Instant },
}

impl MissionRun {
    fn new(mission: Mission) -> Self {
        Self {
            mission,
            waypoint_index: 0,
            rotation_index: 0,
            phase: MissionPhase::NextWaypoint,
        }
    }
}

enum Flow {
    Continue,
    Shutdown,
}

struct Controller<L> {
    link: L,
    config: ControllerConfig,
    state: VehicleState,
    fences: FenceSupervisor,
    maneuver: Maneuver,
    nav: Option<Direction>,
    nav_speed_mps: f64,
    move_speed_mps: f64,
    events: broadcast::Sender<DroneEvent>,
    telemetry_tx: watch::Sender<TelemetrySnapshot>,
    telemetry_elapsed: Duration,
}

impl<L: DroneLink> Controller<L> {
    fn new(
        mut link: L,
        config: ControllerConfig,
        events: broadcast::Sender<DroneEvent>,
        telemetry_tx: watch::Sender<TelemetrySnapshot>,
    ) -> Self {
        // A failed deck probe downgrades deck telemetry instead of failing
        // startup; the sample stream simply omits the missing readings.
        match link.deck_inventory() {
            Ok(decks) => {
                tracing::info!(flow = decks.flow, multiranger = decks.multiranger, "deck inventory");
            }
            Err(err) => {
                tracing::warn!(%err, "deck probe failed, continuing without decks");
            }
        }

        let fences = FenceSupervisor::new(config.rect_fence_period, config.polygon_fence_period);
        let nav_speed_mps = config.nav_speed_mps;
        let move_speed_mps = config.move_speed_mps;

        Self {
            link,
            config,
            state: VehicleState::default(),
            fences,
            maneuver: Maneuver::Idle,
            nav: None,
            nav_speed_mps,
            move_speed_mps,
            events,
            telemetry_tx,
            telemetry_elapsed: Duration::ZERO,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<DroneCommand>) {
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Flow::Shutdown = self.handle(command) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.step(self.config.tick);
                }
            }
        }

        tracing::info!("controller task stopped");
    }

    fn emit(&self, event: DroneEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, to: FlightState) {
        let from = self.state.state;
        if from != to {
            tracing::info!(?from, ?to, "flight state changed");
            self.state.state = to;
            self.emit(DroneEvent::StateChanged { from, to });
        }
    }

    /// Log and report a failed link call; the vehicle keeps its state.
    fn try_link(&mut self, result: Result<(), LinkError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(%err, "link call failed");
                self.emit(DroneEvent::LinkTrouble {
                    detail: err.to_string(),
                });
                false
            }
        }
    }

    fn step(&mut self, dt: Duration) {
        self.link.advance(dt);

        match self.link.sample() {
            Ok(sample) => self.apply_sample(sample),
            Err(err) => {
                tracing::warn!(%err, "telemetry sample failed");
                self.emit(DroneEvent::LinkTrouble {
                    detail: err.to_string(),
                });
            }
        }

        self.advance_maneuver();
        self.check_nav_lookahead();

        let flying = self.state.state.is_flying();
        let decisions = self.fences.tick(dt, flying, self.state.position);
        for decision in decisions {
            self.apply_fence_decision(decision);
        }

        self.telemetry_elapsed += dt;
        let period = Duration::from_secs_f64(1.0 / self.config.telemetry_hz.max(0.1));
        if self.telemetry_elapsed >= period {
            self.telemetry_elapsed = Duration::ZERO;
            self.telemetry_tx
                .send_replace(TelemetrySnapshot::from_state(&self.state));
        }
    }

    fn apply_sample(&mut self, sample: RawSample) {
        self.state.position = raw_to_room_position(sample.position);
        self.state.velocity = [
            sample.velocity[0],
            -sample.velocity[1],
            sample.velocity[2],
        ];
        self.state.attitude = raw_to_room_attitude(sample.attitude);
        self.state.battery_v = sample.battery_v;
        self.state.zrange_alt_m = sample.zrange_alt_m;
        self.state.flow = sample.flow;
        self.state.ranger = sample.ranger;
    }

    // ===== maneuver progression =====

    fn advance_maneuver(&mut self) {
        let maneuver = std::mem::replace(&mut self.maneuver, Maneuver::Idle);
        let now = Instant::now();

        self.maneuver = match maneuver {
            Maneuver::Idle => Maneuver::Idle,

            Maneuver::TakingOff { target_m, deadline } => {
                let arrived = (self.state.position[2] - target_m).abs() < ARRIVAL_TOLERANCE_M;
                if arrived || now >= deadline {
                    tracing::info!(altitude = self.state.position[2], "takeoff finished");
                    self.set_state(FlightState::Flying);
                    self.emit(DroneEvent::ManeuverComplete {
                        kind: ManeuverKind::TakeOff,
                    });
                    Maneuver::Idle
                } else {
                    Maneuver::TakingOff { target_m, deadline }
                }
            }

            Maneuver::Goto {
                target,
                deadline,
                kind,
            } => {
                if self.arrived_at(target) || now >= deadline {
                    if !self.arrived_at(target) {
                        tracing::warn!(?target, "arrival timeout, reporting position reached");
                    }
                    self.emit(DroneEvent::ManeuverComplete { kind });
                    Maneuver::Idle
                } else {
                    Maneuver::Goto {
                        target,
                        deadline,
                        kind,
                    }
                }
            }

            Maneuver::ChangingAltitude { target_m, deadline } => {
                let arrived = (self.state.position[2] - target_m).abs() < ALTITUDE_BAND_M;
                if arrived || now >= deadline {
                    self.set_state(FlightState::Flying);
                    self.emit(DroneEvent::ManeuverComplete {
                        kind: ManeuverKind::ChangeAltitude,
                    });
                    Maneuver::Idle
                } else {
                    Maneuver::ChangingAltitude { target_m, deadline }
                }
            }

            Maneuver::Returning { deadline } => {
                let [x, y, _] = self.state.position;
                if (x.abs() < ARRIVAL_TOLERANCE_M && y.abs() < ARRIVAL_TOLERANCE_M)
                    || now >= deadline
                {
                    self.begin_landing(ManeuverKind::Rtl)
                } else {
                    Maneuver::Returning { deadline }
                }
            }

            Maneuver::Landing { kind } => {
                if self.state.position[2] < LANDED_ALT_M {
                    tracing::info!("landed");
                    self.set_state(FlightState::Connected);
                    self.emit(DroneEvent::ManeuverComplete { kind });
                    Maneuver::Idle
                } else {
                    Maneuver::Landing { kind }
                }
            }

            Maneuver::Mission(run) => self.advance_mission(run),
        };
    }

    fn advance_mission(&mut self, mut run: MissionRun) -> Maneuver {
        if self.state.state != FlightState::Flying {
            tracing::warn!("vehicle left flying state, aborting mission");
            self.emit(DroneEvent::MissionAborted);
            return Maneuver::Idle;
        }

        let now = Instant::now();
        let total = run.mission.waypoints.len();

        match run.phase {
            MissionPhase::NextWaypoint => {
                if run.waypoint_index >= total {
                    run.phase = MissionPhase::NextRotation;
                    return Maneuver::Mission(run);
                }

                let wp = run.mission.waypoints[run.waypoint_index];
                self.emit(DroneEvent::MissionProgress {
                    waypoint: run.waypoint_index + 1,
                    total,
                });

                if let Some(fence) = self.fences.target_violation(wp.x, wp.y, wp.z) {
                    // Unreachable waypoint: report it and keep flying the
                    // rest of the mission
                    tracing::warn!(waypoint = run.waypoint_index + 1, ?fence, "waypoint fenced off, skipping");
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Goto,
                        reason: RejectReason::FenceViolation(fence),
                    });
                    run.waypoint_index += 1;
                    run.phase = MissionPhase::Pausing {
                        until: now + self.config.waypoint_pause,
                    };
                } else if self.within_min_delta([wp.x, wp.y, wp.z]) {
                    run.waypoint_index += 1;
                    run.phase = MissionPhase::Pausing {
                        until: now + self.config.waypoint_pause,
                    };
                } else {
                    self.command_move_to([wp.x, wp.y, wp.z]);
                    run.phase = MissionPhase::Travelling {
                        target: [wp.x, wp.y, wp.z],
                        deadline: now + GOTO_TIMEOUT,
                    };
                }
                Maneuver::Mission(run)
            }

            MissionPhase::Travelling { target, deadline } => {
                if self.arrived_at(target) || now >= deadline {
                    run.waypoint_index += 1;
                    run.phase = MissionPhase::Pausing {
                        until: now + self.config.waypoint_pause,
                    };
                }
                Maneuver::Mission(run)
            }

            MissionPhase::Pausing { until } => {
                if now >= until {
                    run.phase = MissionPhase::NextWaypoint;
                }
                Maneuver::Mission(run)
            }

            MissionPhase::NextRotation => {
                if run.rotation_index >= run.mission.rotations.len() {
                    tracing::info!("mission complete");
                    self.emit(DroneEvent::MissionComplete);
                    return Maneuver::Idle;
                }
                let degrees = run.mission.rotations[run.rotation_index];
                self.rotate_to(degrees);
                run.rotation_index += 1;
                run.phase = MissionPhase::RotationPause {
                    until: now + self.config.rotation_pause,
                };
                Maneuver::Mission(run)
            }

            MissionPhase::RotationPause { until } => {
                if now >= until {
                    run.phase = MissionPhase::NextRotation;
                }
                Maneuver::Mission(run)
            }
        }
    }

    /// Replacing a running mission must not be silent.
    fn cancel_active_mission(&mut self) {
        if matches!(self.maneuver, Maneuver::Mission(_)) {
            tracing::warn!("active mission cancelled");
            self.emit(DroneEvent::MissionAborted);
            self.maneuver = Maneuver::Idle;
        }
    }

    fn arrived_at(&self, target: [f64; 3]) -> bool {
        let p = self.state.position;
        (p[0] - target[0]).abs() < ARRIVAL_TOLERANCE_M
            && (p[1] - target[1]).abs() < ARRIVAL_TOLERANCE_M
            && (p[2] - target[2]).abs() < ARRIVAL_TOLERANCE_M
    }

    fn within_min_delta(&self, target: [f64; 3]) -> bool {
        let p = self.state.position;
        (p[0] - target[0]).abs() <= GOTO_MIN_DELTA_M
            && (p[1] - target[1]).abs() <= GOTO_MIN_DELTA_M
            && (p[2] - target[2]).abs() <= GOTO_MIN_DELTA_M
    }

    /// Hover, then fly a body-frame move toward a room-frame target.
    fn command_move_to(&mut self, target: [f64; 3]) {
        let p = self.state.position;
        let (dx_w, dy_w) = (target[0] - p[0], target[1] - p[1]);
        let dz = target[2] - p[2];
        let (dx_body, dy_body) = room_to_body(self.state.yaw_deg(), dx_w, dy_w);

        let speed = self.move_speed_mps;
        let stop = self.link.stop();
        self.try_link(stop);
        let moved = self.link.move_distance(dx_body, dy_body, dz, speed);
        self.try_link(moved);
    }

    fn rotate_to(&mut self, target_deg: f64) {
        let current = normalize_heading(self.state.yaw_deg());
        let delta = shortest_heading_delta(current, normalize_heading(target_deg));
        if delta.abs() > HEADING_DEADBAND_DEG {
            let turned = self.link.turn(delta);
            self.try_link(turned);
        }
    }

    fn begin_landing(&mut self, kind: ManeuverKind) -> Maneuver {
        self.set_state(FlightState::Landing);
        self.nav = None;
        let stop = self.link.stop();
        self.try_link(stop);
        let speed = self.move_speed_mps;
        let landing = self.link.land(speed);
        self.try_link(landing);
        Maneuver::Landing { kind }
    }

    fn begin_rtl(&mut self) -> Maneuver {
        self.set_state(FlightState::Returning);
        self.nav = None;
        // Back to the launch point at the current altitude
        let [x, y, z] = self.state.position;
        self.command_move_to([0.0, 0.0, z]);
        tracing::info!(x, y, "returning to launch");
        Maneuver::Returning {
            deadline: Instant::now() + RTL_TIMEOUT,
        }
    }

    // ===== continuous-motion safety =====

    fn check_nav_lookahead(&mut self) {
        let Some(direction) = self.nav else {
            return;
        };
        if !self.state.state.is_flying() {
            return;
        }

        let step = direction.body_step(self.nav_speed_mps * LOOKAHEAD_S);
        let (wx, wy) = body_to_room(self.state.yaw_deg(), step[0], step[1]);
        let p = self.state.position;
        let predicted = [p[0] + wx, p[1] + wy, p[2] + step[2]];

        if let Some(fence) = self.fences.target_violation(predicted[0], predicted[1], predicted[2])
        {
            tracing::warn!(?fence, "nav motion would leave the fence, stopping");
            self.emit(DroneEvent::MotionBlocked { fence });
            self.nav = None;
            let stop = self.link.stop();
            self.try_link(stop);
        }
    }

    fn apply_fence_decision(&mut self, decision: FenceDecision) {
        match decision {
            FenceDecision::Correct { fence, dx, dy } => {
                self.emit(DroneEvent::GeofenceBreach {
                    fence,
                    position: self.state.position,
                    action: BreachAction::Correct,
                });
                self.nav = None;
                let (dx_body, dy_body) = room_to_body(self.state.yaw_deg(), dx, dy);
                let speed = self.move_speed_mps;
                let stop = self.link.stop();
                self.try_link(stop);
                let moved = self.link.move_distance(dx_body, dy_body, 0.0, speed);
                self.try_link(moved);
            }
            FenceDecision::Descend { fence, action } => {
                self.emit(DroneEvent::GeofenceBreach {
                    fence,
                    position: self.state.position,
                    action,
                });
                self.nav = None;
                self.cancel_active_mission();
                match action {
                    BreachAction::Land => self.maneuver = self.begin_landing(ManeuverKind::Land),
                    BreachAction::Rtl => self.maneuver = self.begin_rtl(),
                    BreachAction::Correct => {}
                }
            }
        }
    }

    // ===== command handling =====

    fn handle(&mut self, command: DroneCommand) -> Flow {
        match command {
            DroneCommand::Arm => {
                if self.state.state == FlightState::Connected {
                    let reset = self.link.reset_estimator();
                    if self.try_link(reset) {
                        self.set_state(FlightState::Armed);
                        self.emit(DroneEvent::ManeuverComplete {
                            kind: ManeuverKind::Arm,
                        });
                    }
                } else {
                    tracing::warn!("not connected, cannot arm");
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Arm,
                        reason: RejectReason::NotConnected,
                    });
                }
            }

            DroneCommand::TakeOff { altitude_m } => {
                if self.state.state == FlightState::Armed {
                    tracing::info!(altitude_m, "taking off");
                    self.set_state(FlightState::TakingOff);
                    let speed = self.move_speed_mps;
                    let lifted = self.link.take_off(altitude_m, speed);
                    if self.try_link(lifted) {
                        self.maneuver = Maneuver::TakingOff {
                            target_m: altitude_m,
                            deadline: Instant::now() + TAKEOFF_TIMEOUT,
                        };
                    } else {
                        self.set_state(FlightState::Armed);
                    }
                } else {
                    tracing::warn!("not armed, cannot take off");
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::TakeOff,
                        reason: RejectReason::NotArmed,
                    });
                }
            }

            DroneCommand::Goto { x, y, z } => self.handle_goto(x, y, z),

            DroneCommand::MoveDistance {
                direction,
                distance_m,
            } => self.handle_move_distance(direction, distance_m),

            DroneCommand::Nav { direction } => {
                if self.state.state.is_flying() {
                    let v = direction.body_step(self.nav_speed_mps);
                    let started = self.link.start_linear_motion(v[0], v[1], v[2], 0.0);
                    if self.try_link(started) {
                        self.nav = Some(direction);
                    }
                } else {
                    tracing::info!("not flying");
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Nav,
                        reason: RejectReason::NotFlying,
                    });
                }
            }

            DroneCommand::Halt => {
                self.nav = None;
                let stop = self.link.stop();
                self.try_link(stop);
            }

            DroneCommand::ChangeHeading { degrees } => {
                if self.state.state.is_flying() {
                    self.rotate_to(degrees);
                    self.emit(DroneEvent::ManeuverComplete {
                        kind: ManeuverKind::ChangeHeading,
                    });
                } else {
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::ChangeHeading,
                        reason: RejectReason::NotFlying,
                    });
                }
            }

            DroneCommand::ChangeAltitude { altitude_m } => self.handle_change_altitude(altitude_m),

            DroneCommand::Rtl => {
                if self.state.state.is_flying() {
                    self.cancel_active_mission();
                    self.maneuver = self.begin_rtl();
                } else {
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Rtl,
                        reason: RejectReason::NotFlying,
                    });
                }
            }

            DroneCommand::Land => {
                if matches!(
                    self.state.state,
                    FlightState::Flying | FlightState::Returning
                ) {
                    self.cancel_active_mission();
                    self.maneuver = self.begin_landing(ManeuverKind::Land);
                } else {
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Land,
                        reason: RejectReason::NotFlying,
                    });
                }
            }

            DroneCommand::SetNavSpeed { speed_mps } => {
                tracing::info!(speed_mps, "nav speed changed");
                self.nav_speed_mps = speed_mps;
            }

            DroneCommand::SetMoveSpeed { speed_mps } => {
                tracing::info!(speed_mps, "move speed changed");
                self.move_speed_mps = speed_mps;
            }

            DroneCommand::SetRectFence { fence, action } => self.fences.set_rect(fence, action),
            DroneCommand::ClearRectFence => self.fences.clear_rect(),
            DroneCommand::SetPolygonFence { fence, action } => {
                self.fences.set_polygon(fence, action)
            }
            DroneCommand::ClearPolygonFence => self.fences.clear_polygon(),
            DroneCommand::SetAltitudeFloor { altitude_m } => self.fences.set_floor(altitude_m),
            DroneCommand::ClearAltitudeFloor => self.fences.clear_floor(),
            DroneCommand::SetAltitudeCeiling { altitude_m } => self.fences.set_ceiling(altitude_m),
            DroneCommand::ClearAltitudeCeiling => self.fences.clear_ceiling(),

            DroneCommand::SendRc(frame) => self.handle_rc(frame),

            DroneCommand::RunMission { mission } => {
                if self.state.state.is_flying() {
                    self.cancel_active_mission();
                    tracing::info!(
                        waypoints = mission.waypoints.len(),
                        rotations = mission.rotations.len(),
                        "mission started"
                    );
                    self.maneuver = Maneuver::Mission(MissionRun::new(mission));
                } else {
                    tracing::error!("vehicle is not flying, mission refused");
                    self.emit(DroneEvent::ManeuverRejected {
                        kind: ManeuverKind::Mission,
                        reason: RejectReason::NotFlying,
                    });
                }
            }

            DroneCommand::Shutdown => {
                if self.state.state.is_flying() {
                    let stop = self.link.stop();
                    self.try_link(stop);
                }
                self.set_state(FlightState::Disconnected);
                return Flow::Shutdown;
            }
        }

        Flow::Continue
    }

    fn handle_goto(&mut self, x: f64, y: f64, z: f64) {
        if !self.state.state.is_flying() {
            tracing::info!("not flying");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::Goto,
                reason: RejectReason::NotFlying,
            });
            return;
        }

        if let Some(fence) = self.fences.target_violation(x, y, z) {
            tracing::info!(?fence, "goto target outside the fence");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::Goto,
                reason: RejectReason::FenceViolation(fence),
            });
            return;
        }

        if self.within_min_delta([x, y, z]) {
            tracing::info!("already in position");
            self.emit(DroneEvent::ManeuverComplete {
                kind: ManeuverKind::Goto,
            });
            return;
        }

        self.cancel_active_mission();
        self.command_move_to([x, y, z]);
        self.maneuver = Maneuver::Goto {
            target: [x, y, z],
            deadline: Instant::now() + GOTO_TIMEOUT,
            kind: ManeuverKind::Goto,
        };
    }

    fn handle_move_distance(&mut self, direction: Direction, distance_m: f64) {
        if !self.state.state.is_flying() {
            tracing::info!("not flying");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::MoveDistance,
                reason: RejectReason::NotFlying,
            });
            return;
        }

        let step = direction.body_step(distance_m);
        let (wx, wy) = body_to_room(self.state.yaw_deg(), step[0], step[1]);
        let p = self.state.position;
        let target = [p[0] + wx, p[1] + wy, p[2] + step[2]];

        if let Some(fence) = self.fences.target_violation(target[0], target[1], target[2]) {
            tracing::info!(?fence, "move would end outside the fence");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::MoveDistance,
                reason: RejectReason::FenceViolation(fence),
            });
            return;
        }

        self.cancel_active_mission();
        let speed = self.move_speed_mps;
        let stop = self.link.stop();
        self.try_link(stop);
        let moved = self.link.move_distance(step[0], step[1], step[2], speed);
        self.try_link(moved);
        self.maneuver = Maneuver::Goto {
            target,
            deadline: Instant::now() + MOVE_TIMEOUT,
            kind: ManeuverKind::MoveDistance,
        };
    }

    fn handle_change_altitude(&mut self, altitude_m: f64) {
        if !self.state.state.is_flying() {
            tracing::warn!("not flying, cannot change altitude");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::ChangeAltitude,
                reason: RejectReason::NotFlying,
            });
            return;
        }

        if self.fences.altitude().below_floor(altitude_m) {
            tracing::warn!(altitude_m, "target altitude inside the floor exclusion");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::ChangeAltitude,
                reason: RejectReason::FenceViolation(FenceKind::Floor),
            });
            return;
        }
        if self.fences.altitude().above_ceiling(altitude_m) {
            tracing::warn!(altitude_m, "target altitude inside the ceiling exclusion");
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::ChangeAltitude,
                reason: RejectReason::FenceViolation(FenceKind::Ceiling),
            });
            return;
        }

        let delta = altitude_m - self.state.position[2];
        if delta.abs() <= ALTITUDE_MIN_DELTA_M {
            tracing::info!(altitude_m, "already at requested altitude");
            self.emit(DroneEvent::ManeuverComplete {
                kind: ManeuverKind::ChangeAltitude,
            });
            return;
        }

        self.cancel_active_mission();
        self.set_state(FlightState::ChangingAltitude);
        let speed = self.move_speed_mps;
        let moved = self.link.move_distance(0.0, 0.0, delta, speed);
        self.try_link(moved);
        self.maneuver = Maneuver::ChangingAltitude {
            target_m: altitude_m,
            deadline: Instant::now() + ALTITUDE_TIMEOUT,
        };
    }

    fn handle_rc(&mut self, frame: RcFrame) {
        if !self.state.state.is_flying() {
            self.emit(DroneEvent::ManeuverRejected {
                kind: ManeuverKind::Rc,
                reason: RejectReason::NotFlying,
            });
            return;
        }

        let mut sp = frame.to_setpoint();

        // Too close to the ground: ignore descent input
        if self.state.position[2] < GROUND_GUARD_M && sp.throttle < 0.0 {
            sp.throttle = 0.0;
        }

        let dx_body = self.config.rc_horizontal_mps * sp.pitch * LOOKAHEAD_S;
        let dy_body = self.config.rc_horizontal_mps * sp.roll * LOOKAHEAD_S;
        let dz = self.config.rc_vertical_mps * sp.throttle * LOOKAHEAD_S;
        let (wx, wy) = body_to_room(self.state.yaw_deg(), dx_body, dy_body);
        let p = self.state.position;
        let predicted = [p[0] + wx, p[1] + wy, p[2] + dz];

        if let Some(fence) = self.fences.target_violation(predicted[0], predicted[1], predicted[2])
        {
            tracing::info!(?fence, "rc input blocked by fence");
            self.emit(DroneEvent::MotionBlocked { fence });
            let stop = self.link.stop();
            self.try_link(stop);
            return;
        }

        let started = self.link.start_linear_motion(
            self.config.rc_horizontal_mps * sp.pitch,
            self.config.rc_horizontal_mps * sp.roll,
            self.config.rc_vertical_mps * sp.throttle,
            self.config.rc_yaw_rate_dps * sp.yaw,
        );
        self.try_link(started);
    }
}
