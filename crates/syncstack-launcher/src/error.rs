//! Launcher error types.

use std::time::Duration;

use thiserror::Error;

use syncstack_secrets::SecretError;

/// Errors that can occur while launching a stack.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A depended-on service never became ready. Reported once per
    /// dependency, listing every service that was therefore not started.
    #[error("{dependency} not ready after {waited:?}; not started: {}", blocked.join(", "))]
    DependencyTimeout {
        dependency: String,
        waited: Duration,
        blocked: Vec<String>,
    },

    /// A service nothing depends on never became ready.
    #[error("{service} not ready after {waited:?}")]
    NotReady { service: String, waited: Duration },

    /// Secret or required setting check failed; the service was not started.
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("failed to start {service}: {reason}")]
    Start { service: String, reason: String },

    /// A job exited unsuccessfully.
    #[error("job {service} failed: {reason}")]
    Job { service: String, reason: String },

    #[error("launch of {0} cancelled")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Config(#[from] syncstack_core::CoreError),

    #[error("state store error: {0}")]
    State(#[from] syncstack_state::StateError),
}

pub type LaunchResult<T> = Result<T, LaunchError>;
