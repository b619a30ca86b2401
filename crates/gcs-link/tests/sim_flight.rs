//! End-to-end runtime tests against the simulated link.
//!
//! The clock starts paused so watchdog cadences and maneuver timeouts run
//! deterministically at virtual speed.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use gcs_core::geofence::{BreachAction, RectFence};
use gcs_core::mission::{Direction, Mission};
use gcs_link::{
    ControllerConfig, Drone, DroneCommand, DroneEvent, FenceKind, FlightState, ManeuverKind,
    RejectReason, SimLink, SimParams,
};

const WAIT: Duration = Duration::from_secs(120);

fn spawn_default() -> Drone {
    Drone::spawn(SimLink::default(), ControllerConfig::default())
}

async fn wait_for<F>(events: &mut broadcast::Receiver<DroneEvent>, pred: F) -> DroneEvent
where
    F: Fn(&DroneEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn arm_and_take_off(drone: &Drone, events: &mut broadcast::Receiver<DroneEvent>) {
    drone.arm().await.unwrap();
    drone.take_off(0.5).await.unwrap();
    wait_for(events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::TakeOff
            }
        )
    })
    .await;
}

/// Fly straight out along +x until the telemetry shows at least `target_x`.
async fn nav_out_to(drone: &Drone, target_x: f64) {
    let mut telemetry = drone.telemetry();
    drone.go(Direction::Forward).await.unwrap();
    timeout(WAIT, async {
        loop {
            telemetry.changed().await.unwrap();
            if telemetry.borrow().position[0] >= target_x {
                break;
            }
        }
    })
    .await
    .expect("never reached the target x");
    drone.halt().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn arm_takeoff_reaches_flying() {
    let drone = spawn_default();
    let mut events = drone.events();

    drone.arm().await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, DroneEvent::StateChanged { .. })).await;
    assert_eq!(
        event,
        DroneEvent::StateChanged {
            from: FlightState::Connected,
            to: FlightState::Armed
        }
    );

    drone.take_off(0.5).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::TakeOff
            }
        )
    })
    .await;

    // Let the climb settle, then confirm altitude and state
    sleep(Duration::from_secs(3)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert_eq!(snapshot.state, FlightState::Flying);
    assert!((snapshot.position[2] - 0.5).abs() < 0.05, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn take_off_requires_armed() {
    let drone = spawn_default();
    let mut events = drone.events();

    drone.take_off(0.5).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::ManeuverRejected { .. })
    })
    .await;
    assert_eq!(
        event,
        DroneEvent::ManeuverRejected {
            kind: ManeuverKind::TakeOff,
            reason: RejectReason::NotArmed
        }
    );
}

#[tokio::test(start_paused = true)]
async fn goto_moves_the_vehicle() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    drone.goto(0.8, -0.6, 0.5).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::Goto
            }
        )
    })
    .await;

    // The move setpoint runs to the exact target after the arrival band
    sleep(Duration::from_secs(5)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!((snapshot.position[0] - 0.8).abs() < 0.05, "{snapshot:?}");
    assert!((snapshot.position[1] + 0.6).abs() < 0.05, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn goto_rejected_outside_rect_fence() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    drone
        .send(DroneCommand::SetRectFence {
            fence: RectFence::new(2.0, 2.0).unwrap(),
            action: BreachAction::Correct,
        })
        .await
        .unwrap();

    drone.goto(5.0, 0.0, 0.5).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::ManeuverRejected { .. })
    })
    .await;
    assert_eq!(
        event,
        DroneEvent::ManeuverRejected {
            kind: ManeuverKind::Goto,
            reason: RejectReason::FenceViolation(FenceKind::Rect)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn nav_stops_before_crossing_fence() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    drone
        .send(DroneCommand::SetRectFence {
            fence: RectFence::new(2.0, 2.0).unwrap(),
            action: BreachAction::Correct,
        })
        .await
        .unwrap();

    drone.go(Direction::Forward).await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, DroneEvent::MotionBlocked { .. })).await;
    assert_eq!(
        event,
        DroneEvent::MotionBlocked {
            fence: FenceKind::Rect
        }
    );

    sleep(Duration::from_secs(2)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!(snapshot.position[0] < 2.1, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn watchdog_corrects_rect_breach() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    // Fly out first, then arm the fence behind the vehicle
    nav_out_to(&drone, 2.6).await;
    drone
        .send(DroneCommand::SetRectFence {
            fence: RectFence::new(2.0, 2.0).unwrap(),
            action: BreachAction::Correct,
        })
        .await
        .unwrap();

    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::GeofenceBreach { .. })
    })
    .await;
    assert!(matches!(
        event,
        DroneEvent::GeofenceBreach {
            fence: FenceKind::Rect,
            action: BreachAction::Correct,
            ..
        }
    ));

    // Corrections repeat on the watchdog cadence until back inside
    let mut telemetry = drone.telemetry();
    timeout(WAIT, async {
        loop {
            telemetry.changed().await.unwrap();
            if telemetry.borrow().position[0] < 2.0 {
                break;
            }
        }
    })
    .await
    .expect("never pushed back inside the fence");
}

#[tokio::test(start_paused = true)]
async fn rect_breach_with_rtl_returns_home_and_lands() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    nav_out_to(&drone, 1.75).await;
    drone
        .send(DroneCommand::SetRectFence {
            fence: RectFence::new(1.5, 1.5).unwrap(),
            action: BreachAction::Rtl,
        })
        .await
        .unwrap();

    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::GeofenceBreach { .. })
    })
    .await;
    assert!(matches!(
        event,
        DroneEvent::GeofenceBreach {
            fence: FenceKind::Rect,
            action: BreachAction::Rtl,
            ..
        }
    ));

    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::Rtl
            }
        )
    })
    .await;

    sleep(Duration::from_secs(2)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert_eq!(snapshot.state, FlightState::Connected);
    assert!(snapshot.position[2] < 0.05, "{snapshot:?}");
    assert!(snapshot.position[0].abs() < 0.45, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn altitude_ceiling_vetoes_climb() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    drone
        .send(DroneCommand::SetAltitudeCeiling { altitude_m: 1.0 })
        .await
        .unwrap();

    drone.change_altitude(1.5).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::ManeuverRejected { .. })
    })
    .await;
    assert_eq!(
        event,
        DroneEvent::ManeuverRejected {
            kind: ManeuverKind::ChangeAltitude,
            reason: RejectReason::FenceViolation(FenceKind::Ceiling)
        }
    );

    // A climb below the ceiling still works
    drone.change_altitude(0.8).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::ChangeAltitude
            }
        )
    })
    .await;
    sleep(Duration::from_secs(2)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert_eq!(snapshot.state, FlightState::Flying);
    assert!((snapshot.position[2] - 0.8).abs() < 0.05, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn move_distance_follows_heading() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    drone.change_heading(90.0).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::ChangeHeading
            }
        )
    })
    .await;

    // Body-forward at heading 90 moves along room +y
    drone.move_distance(Direction::Forward, 0.6).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::MoveDistance
            }
        )
    })
    .await;

    sleep(Duration::from_secs(4)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!((snapshot.yaw_deg - 90.0).abs() < 1.0, "{snapshot:?}");
    assert!((snapshot.position[1] - 0.6).abs() < 0.05, "{snapshot:?}");
    assert!(snapshot.position[0].abs() < 0.05, "{snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn rc_input_drives_and_is_fence_limited() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    // Full forward pitch: continuous motion until the next frame
    drone
        .send_rc(gcs_link::rc::RcFrame {
            roll_us: 1500.0,
            pitch_us: 2000.0,
            throttle_us: 1500.0,
            yaw_us: 1500.0,
        })
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!(snapshot.position[0] > 0.3, "{snapshot:?}");

    // With a fence right ahead, the same input is blocked
    drone
        .send(DroneCommand::SetRectFence {
            fence: RectFence::new(1.0, 1.0).unwrap(),
            action: BreachAction::Correct,
        })
        .await
        .unwrap();
    drone
        .send_rc(gcs_link::rc::RcFrame {
            roll_us: 1500.0,
            pitch_us: 2000.0,
            throttle_us: 1500.0,
            yaw_us: 1500.0,
        })
        .await
        .unwrap();

    // Either blocked outright or corrected back by the watchdog
    let event = wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::MotionBlocked { .. } | DroneEvent::GeofenceBreach { .. }
        )
    })
    .await;
    match event {
        DroneEvent::MotionBlocked { fence } | DroneEvent::GeofenceBreach { fence, .. } => {
            assert_eq!(fence, FenceKind::Rect);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn mission_flies_square_and_completes() {
    let drone = spawn_default();
    let mut events = drone.events();
    arm_and_take_off(&drone, &mut events).await;

    let mut mission = Mission::square(1.0, 0.5);
    mission.add_rotation(90.0);
    drone.run_mission(mission).await.unwrap();

    let first = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::MissionProgress { .. })
    })
    .await;
    assert_eq!(
        first,
        DroneEvent::MissionProgress {
            waypoint: 1,
            total: 4
        }
    );

    wait_for(&mut events, |e| matches!(e, DroneEvent::MissionComplete)).await;

    // Square closes back at the origin, final rotation points east
    sleep(Duration::from_secs(5)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!(snapshot.position[0].abs() < 0.45, "{snapshot:?}");
    assert!(snapshot.position[1].abs() < 0.45, "{snapshot:?}");
    assert!((snapshot.yaw_deg - 90.0).abs() < 1.0, "{snapshot:?}");
    assert_eq!(snapshot.state, FlightState::Flying);
}

#[tokio::test(start_paused = true)]
async fn mission_requires_flying() {
    let drone = spawn_default();
    let mut events = drone.events();

    drone.run_mission(Mission::square(1.0, 0.5)).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, DroneEvent::ManeuverRejected { .. })
    })
    .await;
    assert_eq!(
        event,
        DroneEvent::ManeuverRejected {
            kind: ManeuverKind::Mission,
            reason: RejectReason::NotFlying
        }
    );
}

#[tokio::test(start_paused = true)]
async fn deck_probe_failure_downgrades_instead_of_crashing() {
    let link = SimLink::new(SimParams {
        fail_deck_query: true,
        flow_deck: false,
        multiranger_deck: false,
        ..SimParams::default()
    });
    let drone = Drone::spawn(link, ControllerConfig::default());
    let mut events = drone.events();

    // The controller still runs and accepts commands
    drone.arm().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::ManeuverComplete {
                kind: ManeuverKind::Arm
            }
        )
    })
    .await;

    sleep(Duration::from_secs(1)).await;
    let snapshot = drone.telemetry().borrow().clone();
    assert!(snapshot.flow.is_none());
    assert!(snapshot.ranger.is_none());
    assert!(snapshot.zrange_alt_m.is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_controller() {
    let drone = spawn_default();
    let mut events = drone.events();

    drone.shutdown().await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(
            e,
            DroneEvent::StateChanged {
                to: FlightState::Disconnected,
                ..
            }
        )
    })
    .await;
    assert!(matches!(event, DroneEvent::StateChanged { .. }));

    // The command queue eventually reports the task gone
    timeout(WAIT, async {
        loop {
            if drone.arm().await.is_err() {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("controller never shut down");
}
