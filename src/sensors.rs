//! Timestamped sensor streams consumed by the filter
//!
//! Streams are read-only snapshots loaded before a run. Each absolute-position
//! stream is consumed through its own monotonic [`StreamCursor`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, Result};
use crate::types::{Mat3, Vec3};

/// Sensor channel identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sensor {
    ImuForce,
    ImuRate,
    Gnss,
    Lidar,
    GroundTruth,
}

impl Display for Sensor {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Sensor::ImuForce => write!(f, "imu_f"),
            Sensor::ImuRate => write!(f, "imu_w"),
            Sensor::Gnss => write!(f, "gnss"),
            Sensor::Lidar => write!(f, "lidar"),
            Sensor::GroundTruth => write!(f, "gt"),
        }
    }
}

/// Parallel arrays of timestamps [s] and 3-vector samples
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StampedData {
    pub t: Vec<f64>,
    pub data: Vec<Vec3>,
}

impl StampedData {
    pub fn new(t: Vec<f64>, data: Vec<Vec3>) -> Self {
        Self { t, data }
    }

    pub fn from_rows(t: Vec<f64>, rows: &[[f64; 3]]) -> Self {
        let data = rows.iter().map(|r| Vec3::new(r[0], r[1], r[2])).collect();
        Self { t, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sample(&self, index: usize) -> Option<(f64, &Vec3)> {
        Some((*self.t.get(index)?, self.data.get(index)?))
    }

    /// Check lengths, finiteness and time ordering.
    ///
    /// `strict` demands strictly increasing timestamps (the IMU clock drives the step
    /// index); otherwise repeated timestamps are allowed.
    pub fn validate(&self, sensor: Sensor, strict: bool) -> Result<()> {
        let stream = sensor.to_string();
        if self.t.len() != self.data.len() {
            return Err(EstimatorError::LengthMismatch {
                stream,
                timestamps: self.t.len(),
                samples: self.data.len(),
            });
        }

        for (index, (t, v)) in self.t.iter().zip(self.data.iter()).enumerate() {
            if !t.is_finite() || v.iter().any(|c| !c.is_finite()) {
                return Err(EstimatorError::NonFinite { stream, index });
            }
        }

        for (index, pair) in self.t.windows(2).enumerate() {
            let ordered = if strict {
                pair[1] > pair[0]
            } else {
                pair[1] >= pair[0]
            };
            if !ordered {
                return Err(EstimatorError::NonMonotonic {
                    stream,
                    index: index + 1,
                });
            }
        }
        Ok(())
    }
}

/// Monotonic read position into a stamped stream
#[derive(Clone, Debug)]
pub struct StreamCursor<'a> {
    stream: &'a StampedData,
    next: usize,
}

impl<'a> StreamCursor<'a> {
    pub fn new(stream: &'a StampedData) -> Self {
        Self { stream, next: 0 }
    }

    /// Next unconsumed sample
    pub fn pending(&self) -> Option<(f64, &'a Vec3)> {
        self.stream.sample(self.next)
    }

    /// Next unconsumed sample if its timestamp is at or before `now`
    pub fn due(&self, now: f64) -> Option<&'a Vec3> {
        match self.pending() {
            Some((t, sample)) if t <= now => Some(sample),
            _ => None,
        }
    }

    pub fn advance(&mut self) {
        if self.next < self.stream.len() {
            self.next += 1;
        }
    }

    /// Number of samples consumed so far
    pub fn consumed(&self) -> usize {
        self.next
    }
}

/// Ground-truth trajectory, used for initialization and offline error reporting
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroundTruth {
    pub t: Vec<f64>,
    /// Position, inertial frame [m]
    pub p: Vec<Vec3>,
    /// Velocity, inertial frame [m/s]
    pub v: Vec<Vec3>,
    /// Roll, pitch, yaw [rad]
    pub r: Vec<Vec3>,
}

impl GroundTruth {
    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let stream = Sensor::GroundTruth.to_string();
        if self.is_empty() {
            return Err(EstimatorError::EmptyStream(stream));
        }
        for found in [self.v.len(), self.r.len()] {
            if found != self.p.len() {
                return Err(EstimatorError::StreamMismatch {
                    stream,
                    expected: self.p.len(),
                    found,
                });
            }
        }
        if !self.t.is_empty() {
            StampedData::new(self.t.clone(), self.p.clone()).validate(Sensor::GroundTruth, false)?;
        }
        Ok(())
    }
}

/// All streams the filter consumes in one run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorSuite {
    /// Specific force, body frame [m/s²]
    pub imu_f: StampedData,
    /// Angular rate, body frame [rad/s]
    pub imu_w: StampedData,
    /// GNSS position, inertial frame [m]
    pub gnss: StampedData,
    /// LIDAR position, already mapped into the vehicle frame [m]
    pub lidar: StampedData,
}

impl SensorSuite {
    /// Precondition check run before any propagation.
    pub fn validate(&self) -> Result<()> {
        if self.imu_f.is_empty() {
            return Err(EstimatorError::EmptyStream(Sensor::ImuForce.to_string()));
        }
        self.imu_f.validate(Sensor::ImuForce, true)?;

        // Angular rate shares the specific-force clock
        if self.imu_w.len() != self.imu_f.len() {
            return Err(EstimatorError::StreamMismatch {
                stream: Sensor::ImuRate.to_string(),
                expected: self.imu_f.len(),
                found: self.imu_w.len(),
            });
        }
        self.imu_w.validate(Sensor::ImuRate, true)?;

        self.gnss.validate(Sensor::Gnss, false)?;
        self.lidar.validate(Sensor::Lidar, false)?;
        Ok(())
    }
}

/// Extrinsic LIDAR → vehicle (IMU) frame calibration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LidarCalibration {
    /// Row-major rotation matrix C_li
    pub rotation: [[f64; 3]; 3],
    /// Translation t_i_li [m]
    pub translation: [f64; 3],
}

impl Default for LidarCalibration {
    /// Calibration for Euler RPY (0.05, 0.05, 0.1)
    fn default() -> Self {
        Self {
            rotation: [
                [0.99376, -0.09722, 0.05466],
                [0.09971, 0.99401, -0.04475],
                [-0.04998, 0.04992, 0.9975],
            ],
            translation: [0.5, 0.1, 0.5],
        }
    }
}

impl LidarCalibration {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        let r = &self.rotation;
        Mat3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        )
    }

    pub fn translation_vector(&self) -> Vec3 {
        Vec3::from(self.translation)
    }

    /// Map the whole raw LIDAR stream into the vehicle frame: x ↦ C·x + t
    pub fn apply(&self, raw: &StampedData) -> StampedData {
        let c = self.rotation_matrix();
        let t = self.translation_vector();
        StampedData {
            t: raw.t.clone(),
            data: raw.data.iter().map(|x| c * x + t).collect(),
        }
    }
}

// ─── Persisted log format ────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamLog {
    pub t: Vec<f64>,
    pub data: Vec<[f64; 3]>,
}

impl From<StreamLog> for StampedData {
    fn from(log: StreamLog) -> Self {
        StampedData::from_rows(log.t, &log.data)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroundTruthLog {
    #[serde(default)]
    pub t: Vec<f64>,
    pub p: Vec<[f64; 3]>,
    pub v: Vec<[f64; 3]>,
    pub r: Vec<[f64; 3]>,
}

impl From<GroundTruthLog> for GroundTruth {
    fn from(log: GroundTruthLog) -> Self {
        let to_vecs = |rows: &[[f64; 3]]| rows.iter().map(|r| Vec3::from(*r)).collect();
        GroundTruth {
            p: to_vecs(&log.p),
            v: to_vecs(&log.v),
            r: to_vecs(&log.r),
            t: log.t,
        }
    }
}

/// Recorded dataset: ground truth plus raw sensor streams (LIDAR still in its own frame)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SensorLog {
    pub gt: GroundTruthLog,
    pub imu_f: StreamLog,
    pub imu_w: StreamLog,
    #[serde(default)]
    pub gnss: StreamLog,
    #[serde(default)]
    pub lidar: StreamLog,
}

impl SensorLog {
    /// Split into ground truth and a filter-ready suite, applying the LIDAR calibration.
    pub fn into_parts(self, calibration: &LidarCalibration) -> (GroundTruth, SensorSuite) {
        let raw_lidar: StampedData = self.lidar.into();
        let suite = SensorSuite {
            imu_f: self.imu_f.into(),
            imu_w: self.imu_w.into(),
            gnss: self.gnss.into(),
            lidar: calibration.apply(&raw_lidar),
        };
        (self.gt.into(), suite)
    }
}
