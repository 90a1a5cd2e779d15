//! Filter output: one state + covariance sample per IMU step
//!
//! Export paths for downstream consumers:
//! - [`Trajectory::to_arrays`]: parallel ndarray blocks (N×3, N×3, N×4, N×9×9)
//! - [`Trajectory::save_estimates`]: `%.3f ` position text used for grading
//! - [`Trajectory::error_report`]: errors and 3σ envelopes against ground truth

use std::fs;
use std::path::Path;

use ndarray::{Array2, Array3};
use serde::Serialize;

use crate::error::{EstimatorError, Result};
use crate::filters::es_ekf::NavState;
use crate::rotations::{angle_normalize, rpy_jacobian_axis_angle, Quaternion};
use crate::sensors::GroundTruth;
use crate::types::{ErrorCov, Vec3, ORI_IDX, POS_IDX};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrajectorySample {
    /// IMU timestamp [s]
    pub t: f64,
    pub state: NavState,
    pub covariance: ErrorCov,
}

/// Append-only sequence indexed by IMU step
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

/// Parallel arrays for the reporting side
#[derive(Clone, Debug)]
pub struct TrajectoryArrays {
    pub positions: Array2<f64>,
    pub velocities: Array2<f64>,
    /// (w, x, y, z) per row
    pub orientations: Array2<f64>,
    pub covariances: Array3<f64>,
}

impl Trajectory {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, t: f64, state: NavState, covariance: ErrorCov) {
        self.samples.push(TrajectorySample {
            t,
            state,
            covariance,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, step: usize) -> Option<&TrajectorySample> {
        self.samples.get(step)
    }

    pub fn last(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.samples.iter().map(|s| s.state.position).collect()
    }

    pub fn velocities(&self) -> Vec<Vec3> {
        self.samples.iter().map(|s| s.state.velocity).collect()
    }

    pub fn orientations(&self) -> Vec<Quaternion> {
        self.samples.iter().map(|s| s.state.orientation).collect()
    }

    pub fn covariances(&self) -> Vec<ErrorCov> {
        self.samples.iter().map(|s| s.covariance).collect()
    }

    pub fn to_arrays(&self) -> TrajectoryArrays {
        let n = self.len();
        let s = &self.samples;
        TrajectoryArrays {
            positions: Array2::from_shape_fn((n, 3), |(i, j)| s[i].state.position[j]),
            velocities: Array2::from_shape_fn((n, 3), |(i, j)| s[i].state.velocity[j]),
            orientations: Array2::from_shape_fn((n, 4), |(i, j)| {
                s[i].state.orientation.to_array()[j]
            }),
            covariances: Array3::from_shape_fn((n, 9, 9), |(i, r, c)| s[i].covariance[(r, c)]),
        }
    }

    /// Position components at `indices`, each written as `%.3f` followed by a space.
    pub fn format_estimates(&self, indices: &[usize]) -> Result<String> {
        let mut out = String::new();
        for &index in indices {
            let sample = self.samples.get(index).ok_or(EstimatorError::IndexOutOfRange {
                index,
                len: self.len(),
            })?;
            for value in sample.state.position.iter() {
                out.push_str(&format!("{:.3} ", value));
            }
        }
        Ok(out)
    }

    pub fn save_estimates(&self, indices: &[usize], path: &Path) -> Result<()> {
        let text = self.format_estimates(indices)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Compare against ground truth over the steps both sequences cover.
    pub fn error_report(&self, gt: &GroundTruth) -> ErrorReport {
        let n = self.len().min(gt.len()).min(gt.r.len());
        let mut samples = Vec::with_capacity(n);
        for step in 0..n {
            let s = &self.samples[step];
            let position_error = gt.p[step] - s.state.position;
            let euler_error = angle_normalize(&(gt.r[step] - s.state.orientation.to_euler()));

            let pos_var = s.covariance.fixed_view::<3, 3>(POS_IDX, POS_IDX).diagonal();
            // First-order mapping of the rotation-vector covariance onto RPY
            let j = rpy_jacobian_axis_angle(&s.state.orientation.to_axis_angle());
            let ori_cov = s.covariance.fixed_view::<3, 3>(ORI_IDX, ORI_IDX);
            let euler_var = (j * ori_cov * j.transpose()).diagonal();

            let sigma3 = |v: f64| 3.0 * v.max(0.0).sqrt();
            samples.push(ErrorSample {
                step,
                position_error: position_error.into(),
                position_sigma3: pos_var.map(sigma3).into(),
                euler_error: euler_error.into(),
                euler_sigma3: euler_var.map(sigma3).into(),
            });
        }
        ErrorReport::from_samples(samples)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorSample {
    pub step: usize,
    /// Ground truth minus estimate [m]
    pub position_error: [f64; 3],
    pub position_sigma3: [f64; 3],
    /// Wrapped roll/pitch/yaw error [rad]
    pub euler_error: [f64; 3],
    pub euler_sigma3: [f64; 3],
}

impl ErrorSample {
    fn within_envelope(&self) -> usize {
        let pos = self
            .position_error
            .iter()
            .zip(self.position_sigma3.iter());
        let ori = self.euler_error.iter().zip(self.euler_sigma3.iter());
        pos.chain(ori).filter(|(e, s)| e.abs() <= **s).count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorReport {
    pub samples: Vec<ErrorSample>,
    pub position_rmse: [f64; 3],
    pub euler_rmse: [f64; 3],
    /// Fraction of per-axis errors inside their 3σ bound
    pub within_3sigma: f64,
}

impl ErrorReport {
    fn from_samples(samples: Vec<ErrorSample>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let rmse = |pick: fn(&ErrorSample) -> [f64; 3]| {
            let mut sum_sq = [0.0; 3];
            for s in &samples {
                for (acc, e) in sum_sq.iter_mut().zip(pick(s)) {
                    *acc += e * e;
                }
            }
            sum_sq.map(|v| (v / n).sqrt())
        };
        let inside: usize = samples.iter().map(ErrorSample::within_envelope).sum();
        Self {
            position_rmse: rmse(|s| s.position_error),
            euler_rmse: rmse(|s| s.euler_error),
            within_3sigma: inside as f64 / (6.0 * n),
            samples,
        }
    }
}
