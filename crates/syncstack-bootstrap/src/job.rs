//! Bootstrap job: drives one run through its state machine.
//!
//! ```text
//! placement check → lease → failed-run gate → entry check
//!   → marker present?  yes: succeeded (adopted, nothing applied)
//!   → partial state?   yes: repair
//!   → initialize → write marker → succeeded
//! any step error → failed (lease released, error recorded)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use syncstack_state::{BootstrapJobRun, BootstrapStatus, StateStore, epoch_secs};

use crate::error::{BootstrapError, BootstrapResult};
use crate::target::BootstrapTarget;

static HOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// How a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Refused while the latest run is failed.
    Normal,
    /// Operator-requested retry after a failed run.
    Retry,
}

pub struct BootstrapJob<T> {
    store: String,
    node: String,
    coordinator: Option<String>,
    lease_ttl: Duration,
    state: StateStore,
    target: T,
}

impl<T: BootstrapTarget> BootstrapJob<T> {
    pub fn new(store: &str, node: &str, state: StateStore, target: T) -> Self {
        Self {
            store: store.to_string(),
            node: node.to_string(),
            coordinator: None,
            lease_ttl: Duration::from_secs(600),
            state,
            target,
        }
    }

    /// Only `coordinator` may run the job.
    pub fn with_coordinator(mut self, coordinator: Option<String>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Run the job once. Ends `succeeded` immediately when the store is
    /// already initialized.
    pub async fn run(&self) -> BootstrapResult<BootstrapJobRun> {
        self.execute(RunMode::Normal).await
    }

    /// Start a new run after a failed one.
    pub async fn retry(&self) -> BootstrapResult<BootstrapJobRun> {
        self.execute(RunMode::Retry).await
    }

    pub async fn execute(&self, mode: RunMode) -> BootstrapResult<BootstrapJobRun> {
        if let Some(coordinator) = &self.coordinator
            && coordinator != &self.node
        {
            return Err(BootstrapError::PlacementViolation {
                store: self.store.clone(),
                node: self.node.clone(),
                coordinator: coordinator.clone(),
            });
        }

        let holder = format!(
            "{}/{}/{}",
            self.node,
            std::process::id(),
            HOLDER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        if !self
            .state
            .try_acquire_lease(&self.store, &holder, self.lease_ttl.as_secs(), epoch_secs())?
        {
            let holder = self
                .state
                .get_lease(&self.store)?
                .map(|lease| lease.holder)
                .unwrap_or_default();
            return Err(BootstrapError::AlreadyRunning {
                store: self.store.clone(),
                holder,
            });
        }

        let result = self.locked(mode).await;

        if let Err(e) = self.state.release_lease(&self.store, &holder) {
            warn!(store = %self.store, error = %e, "failed to release bootstrap lease");
        }
        result
    }

    /// Everything after the lease is held. The latest run is read under the
    /// lease so a run that finished meanwhile is never rewritten.
    async fn locked(&self, mode: RunMode) -> BootstrapResult<BootstrapJobRun> {
        let latest = self.state.latest_run(&self.store)?;
        if let Some(run) = &latest
            && run.status == BootstrapStatus::Failed
            && mode == RunMode::Normal
        {
            return Err(BootstrapError::RetryRequired {
                store: self.store.clone(),
                run_id: run.id,
                reason: run.error.clone().unwrap_or_default(),
            });
        }

        // A run still marked running outlived its lease: its process is gone.
        let attempt = match latest {
            Some(mut stale) if stale.status == BootstrapStatus::Running => {
                warn!(store = %self.store, run_id = stale.id, "abandoning stale bootstrap run");
                stale.transition(BootstrapStatus::Failed, epoch_secs())?;
                stale.error = Some("abandoned: lease expired".to_string());
                self.state.put_run(&stale)?;
                stale.attempt + 1
            }
            Some(prev) if prev.status == BootstrapStatus::Failed => prev.attempt + 1,
            _ => 1,
        };

        self.target
            .check_entry()
            .await
            .map_err(|e| BootstrapError::StoreUnreachable {
                store: self.store.clone(),
                reason: e.to_string(),
            })?;

        let mut run = self
            .state
            .create_run(&self.store, &self.node, attempt, epoch_secs())?;
        run.transition(BootstrapStatus::Running, epoch_secs())?;
        self.state.put_run(&run)?;
        info!(store = %self.store, run_id = run.id, attempt, "bootstrap run started");

        match self.apply(&mut run).await {
            Ok(()) => {
                run.transition(BootstrapStatus::Succeeded, epoch_secs())?;
                self.state.put_run(&run)?;
                info!(
                    store = %self.store,
                    run_id = run.id,
                    adopted = run.adopted,
                    repaired = run.repaired,
                    "bootstrap run succeeded"
                );
                Ok(run)
            }
            Err(e) => {
                let reason = e.to_string();
                run.transition(BootstrapStatus::Failed, epoch_secs())?;
                run.error = Some(reason.clone());
                self.state.put_run(&run)?;
                warn!(store = %self.store, run_id = run.id, %reason, "bootstrap run failed");
                Err(BootstrapError::Failure {
                    store: self.store.clone(),
                    run_id: run.id,
                    reason,
                })
            }
        }
    }

    async fn apply(&self, run: &mut BootstrapJobRun) -> BootstrapResult<()> {
        if self.target.has_marker().await? {
            info!(store = %self.store, "store already initialized, adopting");
            run.adopted = true;
            return Ok(());
        }

        if self.target.detect_partial().await? {
            warn!(store = %self.store, "partial initialization found, repairing");
            self.target.repair().await?;
            run.repaired = true;
        }

        self.target.initialize().await?;
        self.target.write_marker().await
    }
}
