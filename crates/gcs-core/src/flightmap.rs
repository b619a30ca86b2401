//! Flight-map persistence: a named flight cage plus obstacles, stored as
//! JSON.
//!
//! The on-disk field names (`nombre`, `geocage`, `obstaculos`, ...) match
//! the map files the legacy planner writes, so existing maps load
//! unchanged.

use std::fs;
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::geometry::{point_in_polygon, polygon_area, polygon_centroid};

/// One obstacle polygon inside a flight map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObstacle {
    pub points: Vec<[f64; 2]>,
}

/// A named flight area: cage polygon, obstacles, free-text description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightMap {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "fecha_creacion", default)]
    pub created_at: String,
    #[serde(default)]
    pub geocage: Vec<[f64; 2]>,
    #[serde(rename = "obstaculos", default)]
    pub obstacles: Vec<MapObstacle>,
    #[serde(rename = "descripcion", default)]
    pub description: String,
}

/// Validation outcome for a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Summary statistics for a map with a cage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapStats {
    pub vertices: usize,
    pub obstacles: usize,
    pub area_m2: f64,
    pub centroid: (f64, f64),
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// Directory-listing entry for a saved map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSummary {
    pub name: String,
    pub file: String,
    pub created_at: String,
    pub vertices: usize,
    pub obstacles: usize,
}

impl FlightMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            geocage: Vec::new(),
            obstacles: Vec::new(),
            description: String::new(),
        }
    }

    /// Save the map as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MapError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::info!(path = %path.display(), "flight map saved");
        Ok(())
    }

    /// Load a map from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let map = serde_json::from_str(&json)?;
        tracing::info!(path = %path.display(), "flight map loaded");
        Ok(map)
    }

    /// Check the map for structural problems.
    ///
    /// Errors block use of the map; warnings are advisory (small cage
    /// area). The launch origin must sit inside the cage because RTL flies
    /// back to it.
    pub fn validate(&self) -> MapValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.geocage.is_empty() {
            errors.push("no flight cage defined".to_string());
        } else if self.geocage.len() < 3 {
            errors.push("flight cage needs at least 3 vertices".to_string());
        } else {
            if !point_in_polygon(0.0, 0.0, &self.geocage) {
                errors.push("the origin (0, 0) is outside the flight cage".to_string());
            }
            let area = polygon_area(&self.geocage);
            if area < 1.0 {
                warnings.push(format!("small cage area: {area:.2} m2"));
            }
        }

        for (i, obstacle) in self.obstacles.iter().enumerate() {
            if obstacle.points.len() < 3 {
                errors.push(format!("obstacle {} has fewer than 3 vertices", i + 1));
            }
        }

        MapValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Summary statistics, or `None` when no cage is defined.
    pub fn stats(&self) -> Option<MapStats> {
        if self.geocage.is_empty() {
            return None;
        }

        let xs: Vec<f64> = self.geocage.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = self.geocage.iter().map(|p| p[1]).collect();

        Some(MapStats {
            vertices: self.geocage.len(),
            obstacles: self.obstacles.len(),
            area_m2: polygon_area(&self.geocage),
            centroid: polygon_centroid(&self.geocage)?,
            x_min: xs.iter().cloned().fold(f64::INFINITY, f64::min),
            x_max: xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            y_min: ys.iter().cloned().fold(f64::INFINITY, f64::min),
            y_max: ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Rectangular cage, centred on the origin or anchored at it.
pub fn rect_cage(width_m: f64, depth_m: f64, centered: bool) -> Vec<[f64; 2]> {
    let (x1, x2, y1, y2) = if centered {
        (-width_m / 2.0, width_m / 2.0, -depth_m / 2.0, depth_m / 2.0)
    } else {
        (0.0, width_m, 0.0, depth_m)
    };
    vec![[x1, y1], [x2, y1], [x2, y2], [x1, y2]]
}

/// Regular polygon approximating a circular cage.
pub fn circular_cage(radius_m: f64, num_points: usize) -> Vec<[f64; 2]> {
    let n = num_points.max(3);
    (0..n)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            [radius_m * angle.cos(), radius_m * angle.sin()]
        })
        .collect()
}

/// List the flight maps in a directory; unreadable files are skipped with
/// a warning.
pub fn list_saved_maps(dir: impl AsRef<Path>) -> Vec<MapSummary> {
    let dir = dir.as_ref();
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut maps = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match FlightMap::load(&path) {
            Ok(map) => maps.push(MapSummary {
                name: map.name,
                file: entry.file_name().to_string_lossy().into_owned(),
                created_at: map.created_at,
                vertices: map.geocage.len(),
                obstacles: map.obstacles.len(),
            }),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping unreadable map");
            }
        }
    }
    maps
}
