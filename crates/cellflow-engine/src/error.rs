//! Error types for the cellflow engine.

use thiserror::Error;

/// Errors produced while rewriting, compiling or running scripts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Why a single function run produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The last compile attempt failed; the message is cached on the function.
    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Fault: {0}")]
    Fault(String),
}

impl From<RunError> for EngineError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Compile(message) => EngineError::Compile(message),
            RunError::Fault(message) => EngineError::Runtime(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
