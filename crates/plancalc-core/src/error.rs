//! Error types for plancalc-core

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in plancalc-core
#[derive(Debug, Error)]
pub enum Error {
    /// Dimension name not registered
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    /// Literal reference to a value that is not in the dimension's master list
    #[error("Unknown value '{value}' for dimension {dimension}")]
    UnknownDimensionValue { dimension: String, value: String },

    /// Duplicate code inside one dimension's master list
    #[error("Duplicate code '{code}' in dimension {dimension}")]
    DuplicateDimensionValue { dimension: String, code: String },

    /// Session id not known to the store
    #[error("Unknown session: {0}")]
    UnknownSession(u64),

    /// Batch id not known to the store
    #[error("Unknown batch: {0}")]
    UnknownBatch(u64),

    /// A unit of work is already open on the store
    #[error("A unit of work is already active")]
    TransactionActive,

    /// Commit or rollback without an open unit of work
    #[error("No active unit of work")]
    NoTransaction,

    /// Fact key that cannot be stored
    #[error("Invalid fact key: {0}")]
    InvalidKey(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create an unknown-value error
    pub fn unknown_value(dimension: impl ToString, value: impl Into<String>) -> Self {
        Error::UnknownDimensionValue {
            dimension: dimension.to_string(),
            value: value.into(),
        }
    }
}
