//! Rotation utilities for the error-state filter
//!
//! Quaternions are Hamilton, scalar-first `(w, x, y, z)` and rotate vectors from the
//! body frame into the inertial frame. Euler angles are roll, pitch, yaw in radians
//! (`R = Rz(yaw) · Ry(pitch) · Rx(roll)`).
//!
//! Composition convention used throughout the filter:
//! - `a.compose_left(&b)`  = `a ⊗ b` (a applied on the left, e.g. inertial-frame correction)
//! - `a.compose_right(&b)` = `b ⊗ a` (a applied on the right, e.g. body-frame increment)

use std::f64::consts::{PI, TAU};

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

use crate::types::{Mat3, Vec3};

/// Below this rotation magnitude the axis is numerically meaningless.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-8;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
#[inline]
pub fn skew_symmetric(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Wrap an angle into (−π, π].
///
/// Both π and −π map to π. Values already inside the interval are returned untouched,
/// which makes the function exactly idempotent.
pub fn wrap_to_pi(x: f64) -> f64 {
    if (x > -PI && x <= PI) || !x.is_finite() {
        return x;
    }
    let wrapped = (x + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Component-wise [`wrap_to_pi`] for Euler angle triples.
pub fn angle_normalize(angles: &Vec3) -> Vec3 {
    angles.map(wrap_to_pi)
}

/// First-order Jacobian of roll/pitch/yaw with respect to the axis-angle vector `a`.
///
/// Used to map orientation-error covariance onto Euler angle uncertainty.
pub fn rpy_jacobian_axis_angle(a: &Vec3) -> Mat3 {
    let t = a.norm();
    if t < SMALL_ANGLE_THRESHOLD {
        return Mat3::identity();
    }
    let t3 = t * t * t;
    let u = a / t;

    let roll_den = t * t * u.x * u.x + 1.0;
    // asin derivative blows up at |a_y| = 1
    let pitch_den = (1.0 - t * t * u.y * u.y).max(1e-12).sqrt();
    let yaw_den = t * t * u.z * u.z + 1.0;

    // ∂rpy / ∂(u, θ)
    #[rustfmt::skip]
    let j_r = SMatrix::<f64, 3, 4>::new(
        t / roll_den, 0.0, 0.0, u.x / roll_den,
        0.0, t / pitch_den, 0.0, u.y / pitch_den,
        0.0, 0.0, t / yaw_den, u.z / yaw_den,
    );

    // ∂(u, θ) / ∂a
    #[rustfmt::skip]
    let j_a = SMatrix::<f64, 4, 3>::new(
        (a.y * a.y + a.z * a.z) / t3, -(a.x * a.y) / t3, -(a.x * a.z) / t3,
        -(a.x * a.y) / t3, (a.x * a.x + a.z * a.z) / t3, -(a.y * a.z) / t3,
        -(a.x * a.z) / t3, -(a.y * a.z) / t3, (a.x * a.x + a.y * a.y) / t3,
        a.x / t, a.y / t, a.z / t,
    );

    j_r * j_a
}

/// Orientation quaternion (w, x, y, z)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Build from raw components (no normalization).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    pub fn from_array(q: [f64; 4]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Build from roll, pitch, yaw [rad]
    pub fn from_euler(rpy: &Vec3) -> Self {
        let (sr, cr) = (0.5 * rpy.x).sin_cos();
        let (sp, cp) = (0.5 * rpy.y).sin_cos();
        let (sy, cy) = (0.5 * rpy.z).sin_cos();

        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Build from a rotation vector (axis × angle). The zero vector maps to identity.
    pub fn from_axis_angle(aa: &Vec3) -> Self {
        let angle = aa.norm();
        if angle < SMALL_ANGLE_THRESHOLD {
            // sin(θ/2)/θ → 1/2
            let v = aa * 0.5;
            return Self::new(1.0, v.x, v.y, v.z).normalize();
        }
        let half = 0.5 * angle;
        let v = aa * (half.sin() / angle);
        Self::new(half.cos(), v.x, v.y, v.z)
    }

    /// Vector (imaginary) part
    pub fn vector(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON {
            // Degenerate input carries no rotation information
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Direction-cosine matrix (body → inertial)
    pub fn to_rotation_matrix(&self) -> Mat3 {
        let v = self.vector();
        Mat3::identity() * (self.w * self.w - v.dot(&v))
            + 2.0 * v * v.transpose()
            + 2.0 * self.w * skew_symmetric(&v)
    }

    /// Rotate a body-frame vector into the inertial frame
    pub fn rotate(&self, v: &Vec3) -> Vec3 {
        self.to_rotation_matrix() * v
    }

    /// Roll, pitch, yaw [rad]
    pub fn to_euler(&self) -> Vec3 {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        Vec3::new(roll, pitch, yaw)
    }

    /// Rotation vector with angle in [0, π] (q and −q are folded together).
    pub fn to_axis_angle(&self) -> Vec3 {
        let q = if self.w < 0.0 {
            Self::new(-self.w, -self.x, -self.y, -self.z)
        } else {
            *self
        };
        let v = q.vector();
        let n = v.norm();
        if n < SMALL_ANGLE_THRESHOLD {
            return v * 2.0;
        }
        let angle = 2.0 * n.atan2(q.w);
        v * (angle / n)
    }

    /// `self ⊗ other`, renormalized
    pub fn compose_left(&self, other: &Quaternion) -> Self {
        Self::hamilton(self, other).normalize()
    }

    /// `other ⊗ self`, renormalized
    pub fn compose_right(&self, other: &Quaternion) -> Self {
        Self::hamilton(other, self).normalize()
    }

    fn hamilton(a: &Quaternion, b: &Quaternion) -> Self {
        Self::new(
            a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        )
    }
}
