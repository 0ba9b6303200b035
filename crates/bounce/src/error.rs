//! Error types for governor construction.
//!
//! The governor itself never fails at runtime: control operations report
//! no-ops through their boolean return, and errors raised by user callbacks
//! propagate to whoever invoked them. Only building a governor can fail.

use thiserror::Error;

/// Errors raised while configuring or building a [`Governor`](crate::Governor).
#[derive(Debug, Error)]
pub enum BounceError {
    /// No scheduler was supplied and there is no tokio runtime to fall back on.
    #[error("no tokio runtime available to drive governor timers; supply a scheduler explicitly")]
    NoRuntime,

    /// The configuration document could not be parsed.
    #[error("invalid governor config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BounceError>;
