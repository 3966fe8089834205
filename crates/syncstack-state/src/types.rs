//! Record types stored in the ledger.

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

// ── Bootstrap ──────────────────────────────────────────────────────

/// Status of a bootstrap job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    Pending,
    Running,
    Succeeded,
    /// Terminal for this run; an operator may start a retry run.
    Failed,
}

impl BootstrapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BootstrapStatus::Succeeded | BootstrapStatus::Failed)
    }

    /// `pending → running → {succeeded | failed}`.
    pub fn can_transition_to(self, next: BootstrapStatus) -> bool {
        matches!(
            (self, next),
            (BootstrapStatus::Pending, BootstrapStatus::Running)
                | (BootstrapStatus::Running, BootstrapStatus::Succeeded)
                | (BootstrapStatus::Running, BootstrapStatus::Failed)
        )
    }
}

/// One execution of the bootstrap job against a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapJobRun {
    pub id: u64,
    /// Store the run targets.
    pub store: String,
    /// Node that executed the run.
    pub node: String,
    pub status: BootstrapStatus,
    /// 1 for the first run, incremented by every operator retry.
    pub attempt: u32,
    /// Partial state from an earlier run was repaired before initializing.
    pub repaired: bool,
    /// Completion was detected from the store marker; nothing was applied.
    pub adopted: bool,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

impl BootstrapJobRun {
    pub fn new(id: u64, store: &str, node: &str, attempt: u32, now: u64) -> Self {
        Self {
            id,
            store: store.to_string(),
            node: node.to_string(),
            status: BootstrapStatus::Pending,
            attempt,
            repaired: false,
            adopted: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Move to `next`, stamping `started_at` / `completed_at`.
    pub fn transition(&mut self, next: BootstrapStatus, now: u64) -> StateResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            BootstrapStatus::Running => self.started_at = Some(now),
            BootstrapStatus::Succeeded | BootstrapStatus::Failed => self.completed_at = Some(now),
            BootstrapStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Build the composite key for the runs table.
    pub fn table_key(&self) -> String {
        run_key(&self.store, self.id)
    }
}

pub(crate) fn run_key(store: &str, id: u64) -> String {
    format!("{store}:{id:020}")
}

/// Exclusive right to run the bootstrap job for a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapLease {
    pub store: String,
    pub holder: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}

// ── Services ───────────────────────────────────────────────────────

/// Launch phase of a service as seen by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Pending,
    /// Waiting for dependencies.
    Waiting,
    Starting,
    Ready,
    Failed,
    /// Never started because a dependency did not become ready.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub name: String,
    pub phase: ServicePhase,
    pub detail: Option<String>,
    pub updated_at: u64,
}

// ── Certificates ───────────────────────────────────────────────────

/// Last known state of the TLS bundle served by the proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CertificateStatus {
    pub name: String,
    /// SHA-256 of the active leaf certificate (hex).
    pub fingerprint: Option<String>,
    pub issued_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub loaded_at: Option<u64>,
    /// Error of the most recent reload attempt, cleared on success.
    pub last_error: Option<String>,
    pub checked_at: u64,
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
