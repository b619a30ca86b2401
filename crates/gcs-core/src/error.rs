//! Error types shared by the core crate.

use thiserror::Error;

/// Errors raised while building geofences or obstacles.
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    #[error("rectangular fence limits must be at least 1 m, got {0:.2} x {1:.2}")]
    LimitTooSmall(f64, f64),

    #[error("altitude floor {floor_m:.2} m must be below ceiling {ceiling_m:.2} m")]
    InvertedAltitudeBand { floor_m: f64, ceiling_m: f64 },
}

/// Errors raised while loading or saving flight maps.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to access map file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse map file: {0}")]
    Parse(#[from] serde_json::Error),
}
