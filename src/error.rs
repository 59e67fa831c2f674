use thiserror::Error;

/// Errors surfaced to callers. Validation and insufficient-data failures are
/// raised before any state mutation; degenerate hot-path inputs (malformed
/// reward features, NaN trend samples) are absorbed by the components
/// themselves and never reach this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("empty feature vector")]
    EmptyFeatures,

    #[error("insufficient data: need {required} {context}, have {actual}")]
    InsufficientData {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

impl EngineError {
    /// Distinguishes "retry later with more data" from permanent validation
    /// failures, so callers can route the two differently.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Rejects non-finite scalars at component boundaries.
pub(crate) fn ensure_finite(value: f64, field: &str) -> EngineResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::InvalidInput(format!(
            "{field} must be finite, got {value}"
        )))
    }
}
