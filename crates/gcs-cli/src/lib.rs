//! Shared helpers for the operator binaries.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gcs_core::flightmap::FlightMap;

/// Initialise tracing from `RUST_LOG`, defaulting to info.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Load a flight map with a readable error.
pub fn load_map(path: impl AsRef<Path>) -> Result<FlightMap> {
    let path = path.as_ref();
    FlightMap::load(path).with_context(|| format!("cannot load flight map {}", path.display()))
}

/// Parse an `x,y,z` point argument.
pub fn parse_point(arg: &str) -> Result<[f64; 3]> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        bail!("expected x,y,z but got '{arg}'");
    }
    let mut point = [0.0; 3];
    for (slot, part) in point.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .with_context(|| format!("invalid coordinate '{part}'"))?;
    }
    Ok(point)
}
