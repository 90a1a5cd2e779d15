//! PID speed controller producing throttle.
//!
//! The derivative term acts on measured speed (not on the error). Throttle is
//! squashed through `(tanh(a) + 1) / 2` for positive commanded acceleration and may
//! rise by at most `throttle_rate_limit` per cycle. Brake is not commanded.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;

/// Values carried from one control cycle to the next
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LongitudinalState {
    pub v_previous: f64,
    pub t_previous: f64,
    pub error_previous: f64,
    pub integral_error_previous: f64,
    pub throttle_previous: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LongitudinalOutput {
    pub throttle: f64,
    pub brake: f64,
}

#[derive(Clone, Debug)]
pub struct SpeedController {
    kp: f64,
    ki: f64,
    kd: f64,
    max_integral: f64,
    throttle_rate_limit: f64,
    min_dt: f64,
}

impl SpeedController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            max_integral: config.max_integral,
            throttle_rate_limit: config.throttle_rate_limit,
            min_dt: config.min_dt,
        }
    }

    pub fn compute(
        &self,
        state: &LongitudinalState,
        v_desired: f64,
        v: f64,
        t: f64,
    ) -> (LongitudinalOutput, LongitudinalState) {
        let mut st = t - state.t_previous;
        if !(st >= self.min_dt) {
            debug!("speed controller: elapsed time {:.2e}s floored to {:.0e}s", st, self.min_dt);
            st = self.min_dt;
        }

        let e_v = v_desired - v;
        let inte_v = (state.integral_error_previous + e_v * st)
            .clamp(-self.max_integral, self.max_integral);
        let derivative = (v - state.v_previous) / st;

        let acc = self.kp * e_v + self.ki * inte_v + self.kd * derivative;

        let mut throttle = if acc > 0.0 {
            (acc.tanh() + 1.0) / 2.0
        } else {
            0.0
        };
        if throttle - state.throttle_previous > self.throttle_rate_limit {
            throttle = state.throttle_previous + self.throttle_rate_limit;
        }

        let next = LongitudinalState {
            v_previous: v,
            t_previous: t,
            error_previous: e_v,
            integral_error_previous: inte_v,
            throttle_previous: throttle,
        };
        (
            LongitudinalOutput {
                throttle,
                brake: 0.0,
            },
            next,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> SpeedController {
        SpeedController::new(&ControllerConfig::default())
    }

    #[test]
    fn test_throttle_rate_limited() {
        let state = LongitudinalState {
            throttle_previous: 0.5,
            ..Default::default()
        };
        // acc = 1.2 · e ≈ 1.0986 → unconstrained throttle 0.9
        let e = 0.8f64.atanh() / 1.2;
        let (out, next) = controller().compute(&state, e, 0.0, 1.0);
        assert!((out.throttle - 0.6).abs() < 1e-12);
        assert_eq!(next.throttle_previous, out.throttle);
    }

    #[test]
    fn test_unconstrained_throttle_squashed() {
        let state = LongitudinalState {
            throttle_previous: 0.85,
            ..Default::default()
        };
        let e = 0.8f64.atanh() / 1.2;
        let (out, _) = controller().compute(&state, e, 0.0, 1.0);
        assert!((out.throttle - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_no_throttle_when_decelerating() {
        let state = LongitudinalState {
            v_previous: 10.0,
            t_previous: 0.0,
            throttle_previous: 0.7,
            ..Default::default()
        };
        let (out, _) = controller().compute(&state, 5.0, 10.0, 0.1);
        assert_eq!(out.throttle, 0.0);
        assert_eq!(out.brake, 0.0);
    }

    #[test]
    fn test_integral_clamped() {
        let state = LongitudinalState {
            integral_error_previous: 9.5,
            ..Default::default()
        };
        let (_, next) = controller().compute(&state, 100.0, 0.0, 1.0);
        assert_eq!(next.integral_error_previous, 10.0);

        let state = LongitudinalState {
            integral_error_previous: -9.5,
            ..Default::default()
        };
        let (_, next) = controller().compute(&state, -100.0, 0.0, 1.0);
        assert_eq!(next.integral_error_previous, -10.0);
    }

    #[test]
    fn test_zero_elapsed_time_is_floored() {
        let state = LongitudinalState {
            v_previous: 1.0,
            t_previous: 2.0,
            ..Default::default()
        };
        let (out, next) = controller().compute(&state, 3.0, 1.0, 2.0);
        assert!(out.throttle.is_finite());
        assert!((next.integral_error_previous - 2.0 * 1e-5).abs() < 1e-15);
    }

    #[test]
    fn test_state_threaded_not_mutated() {
        let state = LongitudinalState::default();
        let (_, next) = controller().compute(&state, 5.0, 2.0, 0.5);
        assert_eq!(state, LongitudinalState::default());
        assert_eq!(next.v_previous, 2.0);
        assert_eq!(next.t_previous, 0.5);
        assert_eq!(next.error_previous, 3.0);
    }
}
