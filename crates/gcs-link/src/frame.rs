//! Coordinate-frame conversions.
//!
//! All public API coordinates use the room frame: x forward, y right,
//! z up, heading in degrees growing clockwise from above. The vehicle's
//! state estimator reports the lateral axis and yaw with the opposite
//! sign; that conversion happens here, once, instead of at every use site.

/// Rotate a room-frame horizontal displacement into the body frame.
pub fn room_to_body(yaw_deg: f64, dx: f64, dy: f64) -> (f64, f64) {
    let yaw = yaw_deg.to_radians();
    (
        dx * yaw.cos() + dy * yaw.sin(),
        -dx * yaw.sin() + dy * yaw.cos(),
    )
}

/// Rotate a body-frame horizontal displacement into the room frame.
pub fn body_to_room(yaw_deg: f64, dx: f64, dy: f64) -> (f64, f64) {
    let yaw = yaw_deg.to_radians();
    (
        dx * yaw.cos() - dy * yaw.sin(),
        dx * yaw.sin() + dy * yaw.cos(),
    )
}

/// Raw estimator position to room frame (lateral axis flipped).
pub fn raw_to_room_position(raw: [f64; 3]) -> [f64; 3] {
    [raw[0], -raw[1], raw[2]]
}

/// Raw estimator attitude `[roll, pitch, yaw]` to room frame (yaw flipped).
pub fn raw_to_room_attitude(raw: [f64; 3]) -> [f64; 3] {
    [raw[0], raw[1], -raw[2]]
}

/// Wrap a heading into `[0, 360)`.
pub fn normalize_heading(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

/// Shortest signed rotation from `current` to `target`, in `(-180, 180]`.
pub fn shortest_heading_delta(current_deg: f64, target_deg: f64) -> f64 {
    (target_deg - current_deg + 540.0).rem_euclid(360.0) - 180.0
}
