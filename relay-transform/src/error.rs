//! Error types for path queries and formula evaluation

use thiserror::Error;

/// A path expression could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path expression: {message} at position {position}")]
pub struct PathError {
    pub message: String,
    pub position: usize,
}

impl PathError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// A formula could not be tokenized or parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// A parsed formula failed while running
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Calls are limited to the built-in pure functions
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{name}() expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },

    /// Operand types do not fit the operator
    #[error("type error in {op}: {message}")]
    Type { op: String, message: String },

    /// The evaluation step budget ran out
    #[error("evaluation budget of {0} steps exceeded")]
    BudgetExceeded(usize),

    /// The result cannot be represented as JSON
    #[error("result is not JSON-serializable: {0}")]
    NotSerializable(String),
}

impl EvalError {
    pub(crate) fn type_error(op: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Type {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Anything that stops a payload from being reshaped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("formula parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("formula evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// The inbound body is not a JSON document
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(String),
}
