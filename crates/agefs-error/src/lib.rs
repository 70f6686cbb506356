#![forbid(unsafe_code)]
//! Error types for agefs.
//!
//! Defines `AgeError` and a `Result<T>` alias used throughout the
//! workspace. Correctness-critical bookkeeping invariants are enforced by
//! hard asserts in `agefs-engine` rather than surfaced here; `AgeError`
//! covers the recoverable and user-facing failure modes.

use thiserror::Error;

/// Unified error type for all agefs operations.
#[derive(Debug, Error)]
pub enum AgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid distribution file {path}: {reason}")]
    Distribution { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot create a single file, exhausted all options")]
    CapacityExhausted,

    #[error("cannot delete a single file of any size")]
    NoVictim,

    #[error("backend {op} failed on {path}: {source}")]
    Backend {
        op: &'static str,
        path: String,
        source: std::io::Error,
    },
}

/// Result alias using `AgeError`.
pub type Result<T> = std::result::Result<T, AgeError>;
