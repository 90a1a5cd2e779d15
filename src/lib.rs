//! Error-state EKF fusing IMU with GNSS and LIDAR position fixes, plus a small
//! PID/Stanley vehicle controller.

pub mod config;
pub mod controller;
pub mod error;
pub mod filters;
pub mod rotations;
pub mod sensors;
pub mod trajectory;
pub mod types;

pub use config::{ControllerConfig, EstimatorConfig, FilterConfig};
pub use error::{EstimatorError, Result};
pub use filters::{EsEkf, FilterPhase, NavState};
pub use rotations::Quaternion;
pub use sensors::{GroundTruth, LidarCalibration, Sensor, SensorLog, SensorSuite, StampedData};
pub use trajectory::{ErrorReport, Trajectory};
