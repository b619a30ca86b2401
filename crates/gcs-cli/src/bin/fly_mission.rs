//! Fly a pattern mission in the simulator under a map's fences.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::time::timeout;

use gcs_cli::{init_tracing, load_map};
use gcs_core::geofence::{BreachAction, PolygonFence};
use gcs_core::mission::Mission;
use gcs_core::pathfinding::{PathFinder, DEFAULT_RESOLUTION_M};
use gcs_link::{
    ControllerConfig, Drone, DroneCommand, DroneEvent, ManeuverKind, SimLink, TelemetryField,
};

const MISSION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pattern {
    Square,
    Triangle,
    Circle,
    Line,
}

#[derive(Parser)]
#[command(about = "Fly a pattern mission in the simulator under a map's fences")]
struct Args {
    /// Path to the flight-map JSON file
    map: PathBuf,

    /// Mission pattern to fly
    #[arg(long, value_enum, default_value_t = Pattern::Square)]
    pattern: Pattern,

    /// Pattern size in meters
    #[arg(long, default_value_t = 2.0)]
    size: f64,

    /// Flight altitude in meters
    #[arg(long, default_value_t = 0.5)]
    alt: f64,

    /// Response when the vehicle escapes the cage
    #[arg(long, value_enum, default_value_t = BreachArg::Correct)]
    on_breach: BreachArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BreachArg {
    Correct,
    Land,
    Rtl,
}

impl From<BreachArg> for BreachAction {
    fn from(arg: BreachArg) -> Self {
        match arg {
            BreachArg::Correct => BreachAction::Correct,
            BreachArg::Land => BreachAction::Land,
            BreachArg::Rtl => BreachAction::Rtl,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let map = load_map(&args.map)?;
    let validation = map.validate();
    for error in &validation.errors {
        tracing::error!("map problem: {error}");
    }
    anyhow::ensure!(validation.valid, "map failed validation");

    let mission = match args.pattern {
        Pattern::Square => Mission::square(args.size, args.alt),
        Pattern::Triangle => Mission::triangle(args.size, args.alt),
        Pattern::Circle => Mission::circle(args.size, args.alt),
        Pattern::Line => Mission::line(args.size, args.alt),
    };

    // Dry-run the route against the map before spending flight time
    let finder = PathFinder::from_map(&map, DEFAULT_RESOLUTION_M)?;
    let waypoints: Vec<[f64; 3]> = mission.waypoints.iter().map(|wp| wp.as_array()).collect();
    let check = finder.validate_mission(&waypoints);
    for problem in &check.problems {
        tracing::warn!("mission check: {problem}");
    }

    // The cage is the fence boundary; obstacles become exclusion holes
    let holes = map
        .obstacles
        .iter()
        .map(|obstacle| obstacle.points.clone())
        .collect();
    let fence =
        PolygonFence::new(map.geocage.clone(), holes).context("map cage is not a usable fence")?;

    let drone = Drone::spawn(SimLink::default(), ControllerConfig::default());
    let mut events = drone.events();

    drone
        .send(DroneCommand::SetPolygonFence {
            fence,
            action: args.on_breach.into(),
        })
        .await?;

    drone.arm().await?;
    drone.take_off(args.alt).await?;

    // The mission is only accepted once the vehicle is flying
    timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(DroneEvent::ManeuverComplete {
                    kind: ManeuverKind::TakeOff,
                }) => break Ok(()),
                Ok(DroneEvent::ManeuverRejected { kind, reason }) => {
                    break Err(anyhow::anyhow!("{kind:?} rejected: {reason:?}"))
                }
                Ok(_) => {}
                Err(err) => break Err(anyhow::anyhow!("event stream ended: {err}")),
            }
        }
    })
    .await
    .context("takeoff timed out")??;

    drone.run_mission(mission).await?;

    let telemetry = drone.telemetry();
    let outcome = timeout(MISSION_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(DroneEvent::MissionProgress { waypoint, total }) => {
                    let status = gcs_link::telemetry::project(
                        &telemetry.borrow().clone(),
                        &[TelemetryField::Position, TelemetryField::Battery],
                    );
                    tracing::info!(?status, "waypoint {waypoint}/{total}");
                }
                Ok(DroneEvent::MissionComplete) => return Ok(()),
                Ok(DroneEvent::MissionAborted) => return Err(()),
                Ok(DroneEvent::GeofenceBreach { fence, action, .. }) => {
                    tracing::warn!(?fence, ?action, "geofence breach");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "event stream ended");
                    return Err(());
                }
            }
        }
    })
    .await
    .context("mission timed out")?;

    match outcome {
        Ok(()) => {
            drone.land().await?;
            let _ = timeout(Duration::from_secs(60), async {
                loop {
                    if let Ok(DroneEvent::ManeuverComplete {
                        kind: ManeuverKind::Land,
                    }) = events.recv().await
                    {
                        break;
                    }
                }
            })
            .await;
            drone.shutdown().await?;
            tracing::info!("mission finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(()) => {
            // The breach response already brought the vehicle down
            drone.shutdown().await?;
            tracing::error!("mission aborted");
            Ok(ExitCode::FAILURE)
        }
    }
}
