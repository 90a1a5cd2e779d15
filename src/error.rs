use thiserror::Error;

use crate::sensors::Sensor;

/// State estimator error types
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Stream '{stream}' has {timestamps} timestamps but {samples} samples")]
    LengthMismatch {
        stream: String,
        timestamps: usize,
        samples: usize,
    },

    #[error("Stream '{stream}' has non-monotonic timestamps at index {index}")]
    NonMonotonic { stream: String, index: usize },

    #[error("Stream '{stream}' has {found} samples, expected {expected} to match the IMU clock")]
    StreamMismatch {
        stream: String,
        expected: usize,
        found: usize,
    },

    #[error("Stream '{0}' is empty")]
    EmptyStream(String),

    #[error("Stream '{stream}' has a non-finite value at index {index}")]
    NonFinite { stream: String, index: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid filter phase: expected {expected:?}, found {found:?}")]
    InvalidPhase {
        expected: crate::filters::es_ekf::FilterPhase,
        found: crate::filters::es_ekf::FilterPhase,
    },

    #[error("Innovation covariance is singular at step {step} ({sensor} update)")]
    SingularInnovation { step: usize, sensor: Sensor },

    #[error("Trajectory index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for estimator operations
pub type Result<T> = std::result::Result<T, EstimatorError>;
