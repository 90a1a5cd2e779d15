use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, Result};
use crate::sensors::LidarCalibration;
use crate::types::Vec3;

// ─── Filter ──────────────────────────────────────────────────────────────────

/// Noise model and constants for one filter run. Fixed for the filter's lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// IMU specific-force variance [m²/s⁴]
    pub var_imu_f: f64,
    /// IMU angular-rate variance [rad²/s²]
    pub var_imu_w: f64,
    /// GNSS position variance [m²]
    pub var_gnss: f64,
    /// LIDAR position variance [m²]
    pub var_lidar: f64,
    /// Gravity, inertial frame [m/s²]
    pub gravity: [f64; 3],
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            var_imu_f: 1.0,
            var_imu_w: 1.0,
            var_gnss: 25.0,
            var_lidar: 0.5,
            gravity: [0.0, 0.0, -9.81],
        }
    }
}

impl FilterConfig {
    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::from(self.gravity)
    }

    pub fn validate(&self) -> Result<()> {
        let variances = [
            ("var_imu_f", self.var_imu_f),
            ("var_imu_w", self.var_imu_w),
            ("var_gnss", self.var_gnss),
            ("var_lidar", self.var_lidar),
        ];
        for (name, value) in variances {
            if !value.is_finite() || value < 0.0 {
                return Err(EstimatorError::InvalidParameters(format!(
                    "{} must be a finite non-negative variance, got {}",
                    name, value
                )));
            }
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(EstimatorError::InvalidParameters(
                "gravity must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Controller ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    // ── Speed PID ──
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub max_integral: f64,
    /// Largest allowed throttle increase per cycle
    pub throttle_rate_limit: f64,
    /// Elapsed-time floor [s]
    pub min_dt: f64,

    // ── Stanley steering ──
    pub k_e: f64,
    /// Added to speed in the cross-track term [m/s]
    pub speed_epsilon: f64,
    /// Steering actuator range [rad]
    pub max_steer: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.2,
            kd: 0.01,
            max_integral: 10.0,
            throttle_rate_limit: 0.1,
            min_dt: 1e-5,
            k_e: 0.3,
            speed_epsilon: 1e-5,
            max_steer: 1.22,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        let gains = [
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("k_e", self.k_e),
        ];
        for (name, value) in gains {
            if !value.is_finite() {
                return Err(EstimatorError::InvalidParameters(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        let bounds = [
            ("max_integral", self.max_integral),
            ("throttle_rate_limit", self.throttle_rate_limit),
            ("min_dt", self.min_dt),
            ("speed_epsilon", self.speed_epsilon),
            ("max_steer", self.max_steer),
        ];
        for (name, value) in bounds {
            if !value.is_finite() || value < 0.0 {
                return Err(EstimatorError::InvalidParameters(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub filter: FilterConfig,
    pub calibration: LidarCalibration,
    pub controller: ControllerConfig,
}

impl EstimatorConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: EstimatorConfig = serde_json::from_reader(reader)?;
        config.filter.validate()?;
        config.controller.validate()?;
        Ok(config)
    }
}
