use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for mcgrid
#[derive(Error, Debug)]
pub enum McError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Axis '{axis}' has no candidate values")]
    EmptyAxis { axis: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Seed and weight derivation errors.
///
/// Every variant aborts table construction before any job is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Axis '{axis}' cannot be coded invertibly: {message}")]
    NonInvertible { axis: String, message: String },

    #[error("Axis '{axis}' contains negative value {value}, which has no seed code")]
    NegativeCode { axis: String, value: String },

    #[error("Seed arithmetic overflowed: {message}")]
    Overflow { message: String },

    #[error("Seed {seed} assigned to both {first} and {second}")]
    SeedCollision {
        seed: u64,
        first: String,
        second: String,
    },

    #[error("Output file {file} produced by more than one row")]
    FilenameCollision { file: String },
}

/// Durable read/write failures for tables and job records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Malformed content in {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("{failed} job record(s) could not be persisted, first: {first}")]
    Batch { failed: usize, first: String },
}

/// Failure of a single row's unit of work.
///
/// Never propagated out of the dispatcher: it is captured as the row's
/// recorded outcome and the batch carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowExecutionError {
    #[error("Work unit failed: {message}")]
    Failed { message: String },

    #[error("Work unit panicked: {message}")]
    Panicked { message: String },

    #[error("Invalid argument '{column}': {message}")]
    InvalidArgument { column: String, message: String },

    #[error("Input {path} unavailable: {message}")]
    MissingInput { path: String, message: String },
}

impl RowExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_argument(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for mcgrid operations
pub type McResult<T> = Result<T, McError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::McError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::McError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::McError::Config(format!($($arg)*))
    };
}
