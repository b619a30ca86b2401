//! Validate a flight-map file and print its statistics.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use gcs_cli::{init_tracing, load_map};
use gcs_core::flightmap::list_saved_maps;

#[derive(Parser)]
#[command(about = "Validate a flight map and print its statistics")]
struct Args {
    /// Path to a flight-map JSON file, or a directory of maps to list
    map: PathBuf,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    if args.map.is_dir() {
        let maps = list_saved_maps(&args.map);
        if maps.is_empty() {
            println!("no maps found in {}", args.map.display());
            return Ok(ExitCode::FAILURE);
        }
        for map in maps {
            println!(
                "{}  {} ({} vertices, {} obstacles, {})",
                map.file, map.name, map.vertices, map.obstacles, map.created_at
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let map = load_map(&args.map)?;
    println!("map: {} ({})", map.name, map.created_at);
    if !map.description.is_empty() {
        println!("description: {}", map.description);
    }

    if let Some(stats) = map.stats() {
        println!(
            "cage: {} vertices, {:.2} m2, x [{:.2}, {:.2}], y [{:.2}, {:.2}]",
            stats.vertices, stats.area_m2, stats.x_min, stats.x_max, stats.y_min, stats.y_max
        );
        println!("obstacles: {}", stats.obstacles);
    }

    let validation = map.validate();
    for warning in &validation.warnings {
        println!("warning: {warning}");
    }
    for error in &validation.errors {
        println!("error: {error}");
    }

    if validation.valid {
        println!("map is valid");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
