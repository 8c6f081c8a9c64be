//! Formula error types

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur during formula parsing, expansion or evaluation
#[derive(Debug, Error)]
pub enum FormulaError {
    /// Formula text outside the grammar
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// Sub-formula expansion does not reach a fixpoint
    #[error("Cyclic sub-formula expansion: {}", chain.join(" -> "))]
    CyclicExpansion { chain: Vec<String> },

    /// Bare symbol with no constant of that name
    #[error("Unknown constant: {0}")]
    UnknownConstant(String),

    /// Sub-formula nesting deeper than the configured limit
    #[error("Sub-formula expansion exceeds {limit} levels: {}", chain.join(" -> "))]
    ExpansionTooDeep { limit: usize, chain: Vec<String> },

    /// `$NAME` with no sub-formula of that name
    #[error("Unknown sub-formula: ${0}")]
    UnknownSubFormula(String),

    /// `REF('name', ...)` with no reference data source of that name
    #[error("Unknown reference data: {0}")]
    UnknownReference(String),

    /// Dimension name that is not registered
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    /// Literal reference to a value missing from the dimension's master list
    #[error("Unknown value '{value}' for dimension {dimension}")]
    UnknownDimensionValue { dimension: String, value: String },

    /// `$LOOP` used for a dimension the formula does not loop over
    #[error("$LOOP used for dimension {0}, which is not a loop dimension")]
    UnboundLoopDimension(String),

    /// AST node outside the evaluable whitelist
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Evaluation failure (type mismatch, division by zero, overflow)
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Wrong number of arguments
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Assignment target that cannot be turned into a fact key
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Failure reported by the fact store
    #[error("Store error: {0}")]
    Store(plancalc_core::Error),
}

impl FormulaError {
    /// Create a parse error
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        FormulaError::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        FormulaError::Evaluation(message.into())
    }
}

impl From<plancalc_core::Error> for FormulaError {
    fn from(err: plancalc_core::Error) -> Self {
        match err {
            plancalc_core::Error::UnknownDimension(name) => FormulaError::UnknownDimension(name),
            plancalc_core::Error::UnknownDimensionValue { dimension, value } => {
                FormulaError::UnknownDimensionValue { dimension, value }
            }
            other => FormulaError::Store(other),
        }
    }
}
