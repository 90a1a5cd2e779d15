//! Peripheral 2-D vehicle controller: PID speed + Stanley steering.
//!
//! Per-cycle memory lives in [`ControllerState`], which the caller threads through
//! successive [`Controller2D::update`] calls.

pub mod lateral;
pub mod longitudinal;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;
use crate::error::{EstimatorError, Result};

pub use lateral::StanleyController;
pub use longitudinal::{LongitudinalOutput, LongitudinalState, SpeedController};

/// Steering range of the actuator in degrees (maps to a command of ±1)
const STEER_RANGE_DEG: f64 = 70.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    /// Desired speed at this point [m/s]
    pub speed: f64,
}

impl Waypoint {
    pub fn new(x: f64, y: f64, speed: f64) -> Self {
        Self { x, y, speed }
    }
}

/// Index and distance of the waypoint closest to (x, y)
pub fn nearest_waypoint(waypoints: &[Waypoint], x: f64, y: f64) -> Option<(usize, f64)> {
    waypoints
        .iter()
        .enumerate()
        .map(|(i, w)| (i, (w.x - x).hypot(w.y - y)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Measured vehicle state for one control cycle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehicleInputs {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub speed: f64,
    /// [s]
    pub timestamp: f64,
    pub frame: u64,
}

/// Actuator commands: throttle/brake in [0, 1], steer in [-1, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ControlCommand {
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControllerState {
    pub longitudinal: LongitudinalState,
    /// Set by the first non-zero frame
    pub started: bool,
    pub command: ControlCommand,
    pub desired_speed: f64,
}

#[derive(Clone, Debug)]
pub struct Controller2D {
    waypoints: Vec<Waypoint>,
    speed: SpeedController,
    steering: StanleyController,
}

impl Controller2D {
    pub fn new(waypoints: Vec<Waypoint>, config: &ControllerConfig) -> Result<Self> {
        if waypoints.is_empty() {
            return Err(EstimatorError::InvalidParameters(
                "controller needs at least one waypoint".to_string(),
            ));
        }
        config.validate()?;
        Ok(Self {
            waypoints,
            speed: SpeedController::new(config),
            steering: StanleyController::new(config),
        })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn update_waypoints(&mut self, waypoints: Vec<Waypoint>) -> Result<()> {
        if waypoints.is_empty() {
            return Err(EstimatorError::InvalidParameters(
                "controller needs at least one waypoint".to_string(),
            ));
        }
        self.waypoints = waypoints;
        Ok(())
    }

    /// Speed attached to the waypoint nearest (x, y)
    pub fn desired_speed(&self, x: f64, y: f64) -> f64 {
        nearest_waypoint(&self.waypoints, x, y)
            .map(|(idx, _)| self.waypoints[idx].speed)
            .unwrap_or(0.0)
    }

    /// One control cycle. The first cycle happens on the first non-zero frame;
    /// until then the previous command is held.
    pub fn update(
        &self,
        state: &ControllerState,
        inputs: &VehicleInputs,
    ) -> (ControlCommand, ControllerState) {
        let desired_speed = self.desired_speed(inputs.x, inputs.y);

        if !state.started && inputs.frame == 0 {
            let next = ControllerState {
                desired_speed,
                ..*state
            };
            return (state.command, next);
        }
        if !state.started {
            info!("controller loop started at t={:.3}s", inputs.timestamp);
        }

        let (long, longitudinal) = self.speed.compute(
            &state.longitudinal,
            desired_speed,
            inputs.speed,
            inputs.timestamp,
        );
        let steer_rad = self.steering.compute(
            &self.waypoints,
            inputs.x,
            inputs.y,
            inputs.yaw,
            inputs.speed,
        );

        let command = ControlCommand {
            throttle: long.throttle.clamp(0.0, 1.0),
            steer: (steer_rad.to_degrees() / STEER_RANGE_DEG).clamp(-1.0, 1.0),
            brake: long.brake.clamp(0.0, 1.0),
        };
        let next = ControllerState {
            longitudinal,
            started: true,
            command,
            desired_speed,
        };
        (command, next)
    }
}
