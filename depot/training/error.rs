use thiserror::Error;

/// Failures of a training run. All of them abort the run before anything is published.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrainingError {
    /// Input columns or label count do not match the configured contract.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// A partition would be empty or miss a class.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// The algorithm rejected its parameters or could not fit.
    #[error("fit failed: {0}")]
    FitFailure(String),
}

impl TrainingError {
    pub(crate) fn fit(reason: impl Into<String>) -> Self {
        Self::FitFailure(reason.into())
    }
}
