//! Error types for model fitting, prediction and metrics.

use thiserror::Error;

/// Result type alias for forecasting operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors that can occur while fitting, predicting or scoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Insufficient data points for the operation.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Two sequences that must line up do not.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A value is NaN or infinite.
    #[error("non-finite value at position {0}")]
    NonFiniteValue(usize),

    /// A true value is zero, so a percentage error is undefined.
    #[error("zero actual value at position {0}")]
    ZeroActual(usize),

    /// Timestamps are not strictly increasing.
    #[error("timestamps must be strictly increasing (position {0})")]
    UnorderedTimestamps(usize),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Numerical failure, such as a non-finite prediction.
    #[error("computation error: {0}")]
    ComputationError(String),

    /// The underlying model failed to fit or predict.
    #[error("model error: {0}")]
    Model(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = ForecastError::InsufficientData { needed: 3, got: 2 };
        assert_eq!(err.to_string(), "insufficient data: need at least 3, got 2");
        assert_eq!(
            ForecastError::ZeroActual(0).to_string(),
            "zero actual value at position 0"
        );
    }
}
