//! Crate-level error type
//!
//! Faults fall into four fatal families: configuration, resumption,
//! checkpoint I/O, and collective communication. Gradient overflow under
//! reduced precision is intentionally NOT an error: it is reported as a
//! skipped step by the precision strategy and training continues.

use thiserror::Error;

/// Errors raised by continuar
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration, detected before training
    #[error("config error: {0}")]
    Config(String),

    /// A checkpoint required to build or resume a task is missing or incompatible
    #[error("resume error: {0}")]
    Resume(String),

    /// Checkpoint or log file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint or config (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Collective communication failure
    #[error("collective error: {0}")]
    Collective(String),
}

/// Result type for continuar operations
pub type Result<T> = std::result::Result<T, Error>;
