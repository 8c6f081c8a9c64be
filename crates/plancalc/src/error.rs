//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by formula runs and planning functions
#[derive(Debug, Error)]
pub enum Error {
    /// Parsing, expansion or evaluation failed
    #[error(transparent)]
    Formula(#[from] plancalc_formula::FormulaError),

    /// The fact store or ledger refused an operation
    #[error(transparent)]
    Store(#[from] plancalc_core::Error),

    /// The request itself is malformed (unknown function kind, missing parameter...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }
}
