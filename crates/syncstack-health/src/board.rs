//! Shared view of which services are ready.
//!
//! Every service launched in a run is registered as `Pending`. Its own
//! launch task settles it exactly once; dependents block on
//! [`ReadinessBoard::wait_for`] until that happens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::error::{ReadinessError, ReadinessResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Ready,
    /// Started but never became ready, or exited with an error.
    Failed(String),
    /// Never started because something it depends on is unavailable.
    Cancelled(String),
}

impl ReadinessState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ReadinessState::Pending)
    }
}

#[derive(Clone, Default)]
pub struct ReadinessBoard {
    entries: Arc<RwLock<HashMap<String, watch::Sender<ReadinessState>>>>,
}

impl ReadinessBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as pending. Re-registering resets it.
    pub async fn register(&self, name: &str) {
        let mut entries = self.entries.write().await;
        match entries.get(name) {
            Some(tx) => {
                tx.send_replace(ReadinessState::Pending);
            }
            None => {
                let (tx, _) = watch::channel(ReadinessState::Pending);
                entries.insert(name.to_string(), tx);
            }
        }
    }

    pub async fn set(&self, name: &str, state: ReadinessState) -> ReadinessResult<()> {
        let entries = self.entries.read().await;
        let tx = entries
            .get(name)
            .ok_or_else(|| ReadinessError::Unknown(name.to_string()))?;
        debug!(service = %name, ?state, "readiness changed");
        tx.send_replace(state);
        Ok(())
    }

    pub async fn state(&self, name: &str) -> Option<ReadinessState> {
        let entries = self.entries.read().await;
        entries.get(name).map(|tx| tx.borrow().clone())
    }

    pub async fn snapshot(&self) -> HashMap<String, ReadinessState> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, tx)| (name.clone(), tx.borrow().clone()))
            .collect()
    }

    /// Block until `name` settles. `Ok` only when it became ready.
    pub async fn wait_for(&self, name: &str) -> ReadinessResult<()> {
        let mut rx = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .ok_or_else(|| ReadinessError::Unknown(name.to_string()))?
                .subscribe()
        };

        let settled = rx
            .wait_for(ReadinessState::is_settled)
            .await
            .map_err(|_| ReadinessError::Cancelled(name.to_string()))?
            .clone();

        match settled {
            ReadinessState::Ready => Ok(()),
            ReadinessState::Failed(reason) | ReadinessState::Cancelled(reason) => {
                Err(ReadinessError::Unavailable {
                    target: name.to_string(),
                    reason,
                })
            }
            ReadinessState::Pending => unreachable!("wait_for returned an unsettled state"),
        }
    }

    /// [`wait_for`](Self::wait_for) bounded by `timeout`.
    pub async fn wait_for_timeout(&self, name: &str, timeout: Duration) -> ReadinessResult<()> {
        match tokio::time::timeout(timeout, self.wait_for(name)).await {
            Ok(result) => result,
            Err(_) => Err(ReadinessError::Timeout {
                target: name.to_string(),
                waited: timeout,
                attempts: 0,
            }),
        }
    }
}
