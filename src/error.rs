//! Error types for LUNA training and evaluation.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, LunaError>;

/// Errors that can occur while building, training, or evaluating a model.
#[derive(Debug, Error)]
pub enum LunaError {
    /// Array shape does not match the declared model dimensions.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Operation that detected the mismatch.
        context: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A computation left the finite domain (zero denominator, NaN, inf).
    #[error("numerical domain error in {context}: value {value}")]
    NumericalDomain {
        /// Operation that produced the value.
        context: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Invalid hyper-parameter or call order.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Linear algebra failure (e.g. non positive-definite precision).
    #[error("linear algebra error: {0}")]
    Linalg(String),

    /// Plot rendering failure.
    #[error("plot error: {0}")]
    Plot(String),

    /// I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LunaError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        LunaError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Returns `value` if it is finite, otherwise a [`LunaError::NumericalDomain`].
pub(crate) fn ensure_finite(context: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(LunaError::NumericalDomain { context, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_finite_rejects_nan_and_inf() {
        assert!(ensure_finite("test", 1.5).is_ok());
        assert!(matches!(
            ensure_finite("test", f64::NAN),
            Err(LunaError::NumericalDomain { .. })
        ));
        assert!(matches!(
            ensure_finite("test", f64::INFINITY),
            Err(LunaError::NumericalDomain { .. })
        ));
    }

    #[test]
    fn shape_error_formats_dimensions() {
        let err = LunaError::shape("forward", &[1, 10], &[2, 10]);
        let msg = err.to_string();
        assert!(msg.contains("forward"));
        assert!(msg.contains("[1, 10]"));
        assert!(msg.contains("[2, 10]"));
    }
}
