//! Error-state EKF: IMU dead reckoning corrected by GNSS and LIDAR position fixes.
//!
//! Nominal state is position and velocity in the inertial frame plus a body → inertial
//! quaternion. The 9-D error state is `[δp, δv, δθ]`, with δθ a rotation vector.
//!
//! One run walks the IMU clock once. Step `k` propagates step `k − 1` with the IMU
//! sample at `k − 1`, then applies at most one GNSS and one LIDAR correction whose
//! timestamps are due, GNSS first.
//!
//! Known simplifications kept on purpose:
//! - the initial covariance is zero (the first ground-truth sample is taken as exact),
//! - each correction is damped by [`CORRECTION_DAMPING`],
//! - the covariance update is `(I − KH)·P` rather than the Joseph form.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::{EstimatorError, Result};
use crate::rotations::{skew_symmetric, Quaternion};
use crate::sensors::{GroundTruth, Sensor, SensorSuite, StreamCursor};
use crate::trajectory::Trajectory;
use crate::types::{
    noise_jacobian, position_jacobian, symmetrize, ErrorCov, KalmanGain, Mat3, MeasurementJacobian,
    NoiseJacobian, PosNoise, ProcessNoise, Vec3, ORI_IDX, POS_IDX, VEL_IDX,
};

/// Fraction of the Kalman correction applied at each measurement update
pub const CORRECTION_DAMPING: f64 = 0.9;

/// Engine lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPhase {
    Uninitialized,
    Running,
    Done,
    /// A run aborted on a numerical failure
    Failed,
}

/// Nominal navigation state
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    /// Position, inertial frame [m]
    pub position: Vec3,
    /// Velocity, inertial frame [m/s]
    pub velocity: Vec3,
    /// Body → inertial rotation
    pub orientation: Quaternion,
}

impl NavState {
    pub fn new(position: Vec3, velocity: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            velocity,
            orientation,
        }
    }

    /// State at the first ground-truth sample
    pub fn from_ground_truth(gt: &GroundTruth) -> Result<Self> {
        gt.validate()?;
        Ok(Self::new(
            gt.p[0],
            gt.v[0],
            Quaternion::from_euler(&gt.r[0]),
        ))
    }
}

pub struct EsEkf {
    config: FilterConfig,
    gravity: Vec3,
    l_jac: NoiseJacobian,
    h_jac: MeasurementJacobian,
    phase: FilterPhase,
    gnss_updates: u64,
    lidar_updates: u64,
}

impl EsEkf {
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gravity: config.gravity_vector(),
            config,
            l_jac: noise_jacobian(),
            h_jac: position_jacobian(),
            phase: FilterPhase::Uninitialized,
            gnss_updates: 0,
            lidar_updates: 0,
        })
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn gnss_updates(&self) -> u64 {
        self.gnss_updates
    }

    pub fn lidar_updates(&self) -> u64 {
        self.lidar_updates
    }

    /// Run the filter initialized from the first ground-truth sample.
    pub fn run(&mut self, gt: &GroundTruth, sensors: &SensorSuite) -> Result<Trajectory> {
        let initial = NavState::from_ground_truth(gt)?;
        self.run_from(initial, sensors)
    }

    /// Run the filter over the full IMU stream from a known initial state.
    ///
    /// Streams are validated before the first propagation. A singular innovation
    /// covariance aborts the run and leaves the engine in [`FilterPhase::Failed`].
    pub fn run_from(&mut self, initial: NavState, sensors: &SensorSuite) -> Result<Trajectory> {
        if self.phase != FilterPhase::Uninitialized {
            return Err(EstimatorError::InvalidPhase {
                expected: FilterPhase::Uninitialized,
                found: self.phase,
            });
        }
        if let Err(e) = sensors.validate() {
            warn!("Rejecting sensor streams: {}", e);
            return Err(e);
        }

        self.phase = FilterPhase::Running;
        let imu_f = &sensors.imu_f;
        let imu_w = &sensors.imu_w;
        let n = imu_f.len();
        info!(
            "ES-EKF run: {} IMU samples, {} GNSS, {} LIDAR",
            n,
            sensors.gnss.len(),
            sensors.lidar.len()
        );

        let mut trajectory = Trajectory::with_capacity(n);
        let mut state = initial;
        let mut p_cov = ErrorCov::zeros();
        trajectory.push(imu_f.t[0], state, p_cov);

        let mut gnss = StreamCursor::new(&sensors.gnss);
        let mut lidar = StreamCursor::new(&sensors.lidar);

        for k in 1..n {
            let delta_t = imu_f.t[k] - imu_f.t[k - 1];
            let (mut state_check, mut p_cov_check) =
                self.propagate(&state, &p_cov, &imu_f.data[k - 1], &imu_w.data[k - 1], delta_t);

            // Tie-break: GNSS is fused before LIDAR when both are due
            let sources = [
                (&mut gnss, Sensor::Gnss, self.config.var_gnss),
                (&mut lidar, Sensor::Lidar, self.config.var_lidar),
            ];
            for (cursor, sensor, sensor_var) in sources {
                let Some(y_k) = cursor.due(imu_f.t[k]) else {
                    continue;
                };
                let Some((corrected, p_cov_hat)) =
                    self.measurement_update(sensor_var, &p_cov_check, y_k, &state_check)
                else {
                    self.phase = FilterPhase::Failed;
                    return Err(EstimatorError::SingularInnovation { step: k, sensor });
                };
                debug!(
                    "step {}: {} correction, |innovation| = {:.3} m",
                    k,
                    sensor,
                    (y_k - state_check.position).norm()
                );
                state_check = corrected;
                p_cov_check = p_cov_hat;
                cursor.advance();
                match sensor {
                    Sensor::Gnss => self.gnss_updates += 1,
                    _ => self.lidar_updates += 1,
                }
            }

            trajectory.push(imu_f.t[k], state_check, p_cov_check);
            state = state_check;
            p_cov = p_cov_check;
        }

        self.phase = FilterPhase::Done;
        info!(
            "ES-EKF done: {} steps, {} GNSS and {} LIDAR corrections",
            trajectory.len(),
            self.gnss_updates,
            self.lidar_updates
        );
        Ok(trajectory)
    }

    /// Propagate state and covariance over `delta_t` with the IMU sample taken at the
    /// start of the interval.
    pub fn propagate(
        &self,
        prev: &NavState,
        p_cov: &ErrorCov,
        imu_f: &Vec3,
        imu_w: &Vec3,
        delta_t: f64,
    ) -> (NavState, ErrorCov) {
        let c_ns = prev.orientation.to_rotation_matrix();
        let c_ns_dot_f = c_ns * imu_f;
        let accel = c_ns_dot_f + self.gravity;

        let position = prev.position + delta_t * prev.velocity + (0.5 * delta_t * delta_t) * accel;
        let velocity = prev.velocity + delta_t * accel;
        // Body-frame increment: q ⊗ Δq
        let q_from_w = Quaternion::from_axis_angle(&(imu_w * delta_t));
        let orientation = q_from_w.compose_right(&prev.orientation);

        // Error-state transition
        let mut f_jac = ErrorCov::identity();
        f_jac
            .fixed_view_mut::<3, 3>(POS_IDX, VEL_IDX)
            .copy_from(&(Mat3::identity() * delta_t));
        f_jac
            .fixed_view_mut::<3, 3>(VEL_IDX, ORI_IDX)
            .copy_from(&(-skew_symmetric(&c_ns_dot_f) * delta_t));

        let q_cov = self.process_noise(delta_t);
        let p_cov_check =
            f_jac * p_cov * f_jac.transpose() + self.l_jac * q_cov * self.l_jac.transpose();

        (
            NavState::new(position, velocity, orientation),
            symmetrize(&p_cov_check),
        )
    }

    /// Discrete IMU noise over one step
    pub fn process_noise(&self, delta_t: f64) -> ProcessNoise {
        let dt2 = delta_t * delta_t;
        let mut q = ProcessNoise::zeros();
        for i in 0..3 {
            q[(i, i)] = dt2 * self.config.var_imu_f;
            q[(i + 3, i + 3)] = dt2 * self.config.var_imu_w;
        }
        q
    }

    /// K = P·Hᵀ·(H·P·Hᵀ + R)⁻¹, or `None` when the innovation covariance is singular.
    pub fn kalman_gain(&self, p_cov: &ErrorCov, sensor_var: f64) -> Option<KalmanGain> {
        let r_cov = PosNoise::identity() * sensor_var;
        let h_t = self.h_jac.transpose();
        let s = self.h_jac * p_cov * h_t + r_cov;
        let s_inv = s.try_inverse()?;
        let k = p_cov * h_t * s_inv;
        k.iter().all(|v| v.is_finite()).then_some(k)
    }

    /// Fuse one absolute position fix `y_k` into the predicted state.
    pub fn measurement_update(
        &self,
        sensor_var: f64,
        p_cov_check: &ErrorCov,
        y_k: &Vec3,
        predicted: &NavState,
    ) -> Option<(NavState, ErrorCov)> {
        let k_gain = self.kalman_gain(p_cov_check, sensor_var)?;

        let innovation = y_k - predicted.position;
        let x_error = (k_gain * innovation) * CORRECTION_DAMPING;

        let position = predicted.position + x_error.fixed_rows::<3>(POS_IDX);
        let velocity = predicted.velocity + x_error.fixed_rows::<3>(VEL_IDX);
        // Inertial-frame correction: δq ⊗ q
        let d_theta: Vec3 = x_error.fixed_rows::<3>(ORI_IDX).into_owned();
        let orientation = Quaternion::from_axis_angle(&d_theta).compose_left(&predicted.orientation);

        let p_cov_hat = (ErrorCov::identity() - k_gain * self.h_jac) * p_cov_check;

        Some((
            NavState::new(position, velocity, orientation),
            symmetrize(&p_cov_hat),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::StampedData;
    use approx::assert_relative_eq;

    fn level_state() -> NavState {
        NavState::new(Vec3::zeros(), Vec3::zeros(), Quaternion::identity())
    }

    fn ekf() -> EsEkf {
        EsEkf::new(FilterConfig::default()).unwrap()
    }

    fn is_symmetric(p: &ErrorCov) -> bool {
        (p - p.transpose()).abs().max() < 1e-12
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = FilterConfig {
            var_gnss: f64::NAN,
            ..Default::default()
        };
        assert!(EsEkf::new(cfg).is_err());
    }

    #[test]
    fn test_propagate_gravity_cancels_at_rest() {
        let f = ekf();
        let (s, _) = f.propagate(
            &level_state(),
            &ErrorCov::zeros(),
            &Vec3::new(0.0, 0.0, 9.81),
            &Vec3::zeros(),
            0.01,
        );
        assert_relative_eq!(s.position, Vec3::zeros(), epsilon = 1e-15);
        assert_relative_eq!(s.velocity, Vec3::zeros(), epsilon = 1e-15);
        assert_eq!(s.orientation, Quaternion::identity());
    }

    #[test]
    fn test_propagate_second_order_position() {
        let f = ekf();
        let prev = NavState::new(Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0), Quaternion::identity());
        let (s, _) = f.propagate(
            &prev,
            &ErrorCov::zeros(),
            &Vec3::new(1.0, 0.0, 9.81),
            &Vec3::zeros(),
            0.5,
        );
        // 2·0.5 + 0.5·1·0.25
        assert_relative_eq!(s.position.x, 1.125, epsilon = 1e-12);
        assert_relative_eq!(s.velocity.x, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_propagate_rotates_force_with_previous_orientation() {
        let f = ekf();
        let yawed = NavState::new(
            Vec3::zeros(),
            Vec3::zeros(),
            Quaternion::from_euler(&Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2)),
        );
        let (s, _) = f.propagate(
            &yawed,
            &ErrorCov::zeros(),
            &Vec3::new(1.0, 0.0, 9.81),
            &Vec3::zeros(),
            1.0,
        );
        assert_relative_eq!(s.velocity, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_propagate_composes_body_rate_on_the_right() {
        let f = ekf();
        let q0 = Quaternion::from_euler(&Vec3::new(0.0, 0.3, 0.0));
        let prev = NavState::new(Vec3::zeros(), Vec3::zeros(), q0);
        let w = Vec3::new(0.0, 0.0, 0.5);
        let (s, _) = f.propagate(&prev, &ErrorCov::zeros(), &Vec3::zeros(), &w, 0.2);

        let expected = q0.to_rotation_matrix()
            * Quaternion::from_axis_angle(&(w * 0.2)).to_rotation_matrix();
        assert_relative_eq!(s.orientation.to_rotation_matrix(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_process_noise_leaves_position_untouched() {
        let f = ekf();
        let (_, p) = f.propagate(
            &level_state(),
            &ErrorCov::zeros(),
            &Vec3::new(0.0, 0.0, 9.81),
            &Vec3::zeros(),
            0.1,
        );
        assert_eq!(p.fixed_view::<3, 3>(POS_IDX, POS_IDX).norm(), 0.0);
        assert_relative_eq!(p[(VEL_IDX, VEL_IDX)], 0.01, epsilon = 1e-15);
        assert_relative_eq!(p[(ORI_IDX, ORI_IDX)], 0.01, epsilon = 1e-15);
    }

    #[test]
    fn test_covariance_symmetric_after_propagate_and_update() {
        let f = ekf();
        let mut state = NavState::new(
            Vec3::new(1.0, 2.0, 0.0),
            Vec3::new(3.0, -1.0, 0.2),
            Quaternion::from_euler(&Vec3::new(0.1, -0.05, 1.2)),
        );
        let mut p = ErrorCov::identity() * 0.1;
        for i in 0..50 {
            let (s, pc) = f.propagate(
                &state,
                &p,
                &Vec3::new(0.4, -0.3, 9.7),
                &Vec3::new(0.01, 0.02, -0.1),
                0.01,
            );
            assert!(is_symmetric(&pc));
            let (s, pc) = if i % 5 == 0 {
                f.measurement_update(0.5, &pc, &(s.position + Vec3::new(0.3, 0.0, -0.1)), &s)
                    .unwrap()
            } else {
                (s, pc)
            };
            assert!(is_symmetric(&pc));
            state = s;
            p = pc;
        }
    }

    #[test]
    fn test_correction_is_damped() {
        let f = ekf();
        let p = ErrorCov::identity() * 4.0;
        let predicted = level_state();
        let y = Vec3::new(1.0, -2.0, 0.5);

        let k = f.kalman_gain(&p, 1.0).unwrap();
        let undamped = k * (y - predicted.position);
        let (corrected, _) = f.measurement_update(1.0, &p, &y, &predicted).unwrap();

        let applied = corrected.position - predicted.position;
        let full: Vec3 = undamped.fixed_rows::<3>(POS_IDX).into_owned();
        assert_relative_eq!(applied, full * 0.9, epsilon = 1e-12);
        // 4 / (4 + 1) of the innovation, then damped
        assert_relative_eq!(applied, y * 0.8 * 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_orientation_correction_composed_on_the_left() {
        let f = ekf();
        let mut p = ErrorCov::identity();
        // Correlate x-position error with z-rotation error
        p[(POS_IDX, ORI_IDX + 2)] = 0.5;
        p[(ORI_IDX + 2, POS_IDX)] = 0.5;
        let q0 = Quaternion::from_euler(&Vec3::new(0.2, 0.0, 0.0));
        let predicted = NavState::new(Vec3::zeros(), Vec3::zeros(), q0);
        let y = Vec3::new(1.0, 0.0, 0.0);

        let k = f.kalman_gain(&p, 1.0).unwrap();
        let dx = (k * y) * CORRECTION_DAMPING;
        let d_theta: Vec3 = dx.fixed_rows::<3>(ORI_IDX).into_owned();
        assert!(d_theta.z.abs() > 1e-3);

        let (corrected, _) = f.measurement_update(1.0, &p, &y, &predicted).unwrap();
        let expected =
            Quaternion::from_axis_angle(&d_theta).to_rotation_matrix() * q0.to_rotation_matrix();
        assert_relative_eq!(corrected.orientation.to_rotation_matrix(), expected, epsilon = 1e-12);
        assert!((corrected.orientation.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_covariance_update_simplified_form() {
        let f = ekf();
        let p = ErrorCov::identity() * 2.0;
        let (_, p_hat) = f
            .measurement_update(2.0, &p, &Vec3::zeros(), &level_state())
            .unwrap();
        // (1 − 2/4)·2 on the position block, other blocks untouched
        assert_relative_eq!(p_hat[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(p_hat[(VEL_IDX, VEL_IDX)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_innovation_returns_none() {
        let f = EsEkf::new(FilterConfig {
            var_gnss: 0.0,
            ..Default::default()
        })
        .unwrap();
        let result = f.measurement_update(0.0, &ErrorCov::zeros(), &Vec3::zeros(), &level_state());
        assert!(result.is_none());
    }

    fn stationary_suite(n: usize) -> SensorSuite {
        let t: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        SensorSuite {
            imu_f: StampedData::new(t.clone(), vec![Vec3::new(0.0, 0.0, 9.81); n]),
            imu_w: StampedData::new(t, vec![Vec3::zeros(); n]),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let mut f = ekf();
        assert_eq!(f.phase(), FilterPhase::Uninitialized);
        assert_eq!(f.config(), &FilterConfig::default());
        let traj = f.run_from(level_state(), &stationary_suite(5)).unwrap();
        assert_eq!(f.phase(), FilterPhase::Done);
        assert_eq!(traj.len(), 5);

        let again = f.run_from(level_state(), &stationary_suite(5));
        assert!(matches!(
            again,
            Err(EstimatorError::InvalidPhase {
                found: FilterPhase::Done,
                ..
            })
        ));
    }

    #[test]
    fn test_run_rejects_malformed_streams_before_running() {
        let mut f = ekf();
        let mut suite = stationary_suite(4);
        suite.imu_f.t[2] = 0.0;
        assert!(matches!(
            f.run_from(level_state(), &suite),
            Err(EstimatorError::NonMonotonic { index: 2, .. })
        ));
        assert_eq!(f.phase(), FilterPhase::Uninitialized);
    }

    #[test]
    fn test_run_singular_update_fails_run() {
        let mut f = EsEkf::new(FilterConfig {
            var_gnss: 0.0,
            ..Default::default()
        })
        .unwrap();
        let mut suite = stationary_suite(3);
        // Due at step 1, where the position covariance is still zero
        suite.gnss = StampedData::new(vec![0.0], vec![Vec3::zeros()]);
        let err = f.run_from(level_state(), &suite).unwrap_err();
        assert!(matches!(
            err,
            EstimatorError::SingularInnovation {
                step: 1,
                sensor: Sensor::Gnss
            }
        ));
        assert_eq!(f.phase(), FilterPhase::Failed);
    }

    #[test]
    fn test_run_consumes_one_fix_per_step() {
        let mut f = ekf();
        let mut suite = stationary_suite(4);
        // Three fixes all due before step 1
        suite.lidar = StampedData::new(vec![0.0, 0.0, 0.0], vec![Vec3::zeros(); 3]);
        f.run_from(level_state(), &suite).unwrap();
        assert_eq!(f.lidar_updates(), 3);
        assert_eq!(f.gnss_updates(), 0);
    }

    #[test]
    fn test_initial_state_from_ground_truth() {
        let gt = GroundTruth {
            t: vec![0.0],
            p: vec![Vec3::new(1.0, 2.0, 3.0)],
            v: vec![Vec3::new(0.5, 0.0, 0.0)],
            r: vec![Vec3::new(0.0, 0.0, 0.3)],
        };
        let s = NavState::from_ground_truth(&gt).unwrap();
        assert_eq!(s.position, Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(s.orientation.to_euler(), Vec3::new(0.0, 0.0, 0.3), epsilon = 1e-12);
        assert!(NavState::from_ground_truth(&GroundTruth::default()).is_err());
    }
}
