//! Plan a route through a flight map and print the waypoints as JSON.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;

use gcs_cli::{init_tracing, load_map, parse_point};
use gcs_core::pathfinding::{PathFinder, DEFAULT_RESOLUTION_M};

#[derive(Parser)]
#[command(about = "Plan an obstacle-avoiding route through a flight map")]
struct Args {
    /// Path to the flight-map JSON file
    map: PathBuf,

    /// Start point as x,y,z
    #[arg(long)]
    from: String,

    /// Goal point as x,y,z
    #[arg(long)]
    to: String,

    /// Grid resolution in meters
    #[arg(long, default_value_t = DEFAULT_RESOLUTION_M)]
    resolution: f64,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let map = load_map(&args.map)?;
    let start = parse_point(&args.from)?;
    let goal = parse_point(&args.to)?;

    let finder = PathFinder::from_map(&map, args.resolution)?;

    for (label, point) in [("start", start), ("goal", goal)] {
        let class = finder.classify(point[0], point[1]);
        if class != gcs_core::pathfinding::PointClass::Safe {
            bail!("{label} point is not flyable: {class:?}");
        }
    }

    let Some(path) = finder.find_path(start, goal) else {
        bail!("no path found between the requested points");
    };

    let output = json!({
        "map": map.name,
        "resolution_m": args.resolution,
        "waypoints": path,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
