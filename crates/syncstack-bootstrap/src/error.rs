use thiserror::Error;

use syncstack_core::CoreError;
use syncstack_state::StateError;

pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The job was started on a node other than the coordinator.
    #[error("bootstrap for {store} must run on {coordinator}, not {node}")]
    PlacementViolation {
        store: String,
        node: String,
        coordinator: String,
    },

    /// Another run holds the lease for this store.
    #[error("bootstrap for {store} is already running ({holder})")]
    AlreadyRunning { store: String, holder: String },

    /// The latest run failed; only an explicit retry may start a new one.
    #[error("bootstrap run {run_id} for {store} failed ({reason}); retry required")]
    RetryRequired {
        store: String,
        run_id: u64,
        reason: String,
    },

    /// Entry condition not met: store unreachable or rejecting credentials.
    #[error("store {store} is not accepting connections: {reason}")]
    StoreUnreachable { store: String, reason: String },

    /// A single target operation failed.
    #[error("{step} failed: {reason}")]
    Step { step: &'static str, reason: String },

    /// The run was recorded as failed.
    #[error("bootstrap run {run_id} for {store} failed: {reason}")]
    Failure {
        store: String,
        run_id: u64,
        reason: String,
    },

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("configuration error: {0}")]
    Config(#[from] CoreError),
}

impl BootstrapError {
    pub(crate) fn step(step: &'static str, reason: impl Into<String>) -> Self {
        BootstrapError::Step {
            step,
            reason: reason.into(),
        }
    }
}
