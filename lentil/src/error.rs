//! Error types for lentil

use thiserror::Error;

/// lentil error type
#[derive(Error, Debug)]
pub enum LentilError {
    /// Mutually exclusive or incomplete inputs, raised before any work starts
    #[error("configuration error: {0}")]
    Config(String),

    /// An optimizer or objective option outside its valid range
    #[error("invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// Vector length does not match what the model or family expects
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Non-finite objective, gradient or parameter (only with `check_finite`)
    #[error("non-finite value at iteration {iteration}")]
    NonFinite { iteration: usize },

    /// Failure reported by a model or fitted-model handle
    #[error("model error: {0}")]
    Model(String),

    /// Automatic differentiation backend error
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LentilError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LentilError>;

/// Fail with `DimensionMismatch` unless `found == expected`.
pub(crate) fn check_dim(expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(LentilError::DimensionMismatch { expected, found })
    }
}
