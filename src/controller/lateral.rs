//! Stanley steering law
//!
//! δ = wrap(ψ_path − ψ) + atan(k_e · e / (v + ε)), clamped to ±max_steer.
//! The cross-track error `e` is positive when the vehicle sits to the right of the
//! path direction, which yields a positive (counter-clockwise) correction.

use crate::config::ControllerConfig;
use crate::rotations::wrap_to_pi;

use super::{nearest_waypoint, Waypoint};

#[derive(Clone, Debug)]
pub struct StanleyController {
    k_e: f64,
    speed_epsilon: f64,
    max_steer: f64,
}

impl StanleyController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            k_e: config.k_e,
            speed_epsilon: config.speed_epsilon,
            max_steer: config.max_steer,
        }
    }

    /// Path heading at waypoint `idx`, taken from the adjoining segment rather than
    /// the chord from the first waypoint. `None` when the path has a single point.
    fn path_heading(waypoints: &[Waypoint], idx: usize) -> Option<f64> {
        let (a, b) = if idx + 1 < waypoints.len() {
            (&waypoints[idx], &waypoints[idx + 1])
        } else if idx > 0 {
            (&waypoints[idx - 1], &waypoints[idx])
        } else {
            return None;
        };
        Some((b.y - a.y).atan2(b.x - a.x))
    }

    /// Front-wheel angle [rad] for a vehicle at (x, y) with heading `yaw` and speed `v`.
    pub fn compute(&self, waypoints: &[Waypoint], x: f64, y: f64, yaw: f64, v: f64) -> f64 {
        let Some((idx, distance)) = nearest_waypoint(waypoints, x, y) else {
            return 0.0;
        };
        let nearest = &waypoints[idx];
        let yaw_path = Self::path_heading(waypoints, idx).unwrap_or(yaw);

        let heading_error = wrap_to_pi(yaw_path - yaw);

        let yaw_cross_track = (y - nearest.y).atan2(x - nearest.x);
        let cross_track = if wrap_to_pi(yaw_path - yaw_cross_track) > 0.0 {
            distance
        } else {
            -distance
        };
        let cross_track_term = (self.k_e * cross_track / (v + self.speed_epsilon)).atan();

        wrap_to_pi(heading_error + cross_track_term).clamp(-self.max_steer, self.max_steer)
    }
}
