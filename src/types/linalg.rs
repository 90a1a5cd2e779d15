//! Linear algebra type system for the error-state filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the propagation and correction steps.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

// ===== State Dimensions =====
pub const ERROR_STATE_DIM: usize = 9; // δp, δv, δθ
pub const PROCESS_NOISE_DIM: usize = 6; // accel noise, gyro noise

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS: usize = 3; // (x, y, z)

// ===== Error-state block offsets =====
pub const POS_IDX: usize = 0;
pub const VEL_IDX: usize = 3;
pub const ORI_IDX: usize = 6;

pub type Vec3 = Vector3<f64>;
pub type Mat3 = Matrix3<f64>;

// ===== 9-State Error Types =====
pub type ErrorVec = SVector<f64, ERROR_STATE_DIM>;
pub type ErrorCov = SMatrix<f64, ERROR_STATE_DIM, ERROR_STATE_DIM>;

// Motion model noise
pub type ProcessNoise = SMatrix<f64, PROCESS_NOISE_DIM, PROCESS_NOISE_DIM>;
pub type NoiseJacobian = SMatrix<f64, ERROR_STATE_DIM, PROCESS_NOISE_DIM>; // 9×6

// Position measurement types
pub type PosMeasurement = SVector<f64, MEASURE_DIM_POS>;
pub type PosNoise = SMatrix<f64, MEASURE_DIM_POS, MEASURE_DIM_POS>;
pub type MeasurementJacobian = SMatrix<f64, MEASURE_DIM_POS, ERROR_STATE_DIM>; // 3×9
pub type KalmanGain = SMatrix<f64, ERROR_STATE_DIM, MEASURE_DIM_POS>; // 9×3

/// Motion model noise Jacobian: noise enters the velocity and orientation blocks only.
pub fn noise_jacobian() -> NoiseJacobian {
    let mut l = NoiseJacobian::zeros();
    l.fixed_view_mut::<6, 6>(VEL_IDX, 0)
        .copy_from(&SMatrix::<f64, 6, 6>::identity());
    l
}

/// Measurement model Jacobian: selects the position block.
pub fn position_jacobian() -> MeasurementJacobian {
    let mut h = MeasurementJacobian::zeros();
    h.fixed_view_mut::<3, 3>(0, POS_IDX).copy_from(&Mat3::identity());
    h
}

/// Force exact symmetry: P = (P + Pᵀ) / 2
pub fn symmetrize(p: &ErrorCov) -> ErrorCov {
    (p + p.transpose()) * 0.5
}
