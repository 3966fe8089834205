//! Readiness error types.

use std::time::Duration;

use thiserror::Error;

pub type ReadinessResult<T> = Result<T, ReadinessError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadinessError {
    /// The target never answered a probe successfully before the deadline.
    #[error("{target} not ready after {waited:?} ({attempts} probes)")]
    Timeout {
        target: String,
        waited: Duration,
        attempts: u32,
    },

    /// The target reached a terminal state other than ready.
    #[error("{target} is unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    /// The target was never registered.
    #[error("unknown readiness target: {0}")]
    Unknown(String),

    /// Waiting was abandoned because of a shutdown signal.
    #[error("readiness wait for {0} cancelled")]
    Cancelled(String),
}
