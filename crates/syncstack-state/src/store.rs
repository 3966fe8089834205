//! StateStore: redb-backed ledger for SyncStack.
//!
//! Provides typed operations over bootstrap runs, bootstrap leases,
//! service launch records and certificate status. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe ledger backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(BOOTSTRAP_RUNS).map_err(map_err!(Table))?;
        txn.open_table(BOOTSTRAP_LEASES).map_err(map_err!(Table))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(CERTIFICATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    // ── Bootstrap runs ─────────────────────────────────────────────

    /// Allocate the next run ID for `store` and persist a pending run,
    /// both in one write transaction.
    pub fn create_run(
        &self,
        store: &str,
        node: &str,
        attempt: u32,
        now: u64,
    ) -> StateResult<BootstrapJobRun> {
        let prefix = format!("{store}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let run;
        {
            let mut table = txn.open_table(BOOTSTRAP_RUNS).map_err(map_err!(Table))?;
            let mut last_id: u64 = 0;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    let existing: BootstrapJobRun =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    last_id = last_id.max(existing.id);
                }
            }
            run = BootstrapJobRun::new(last_id + 1, store, node, attempt, now);
            let value = serde_json::to_vec(&run).map_err(map_err!(Serialize))?;
            table
                .insert(run.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%store, run_id = run.id, "bootstrap run created");
        Ok(run)
    }

    /// Insert or update a run.
    pub fn put_run(&self, run: &BootstrapJobRun) -> StateResult<()> {
        self.put(BOOTSTRAP_RUNS, &run.table_key(), run)
    }

    pub fn get_run(&self, store: &str, id: u64) -> StateResult<Option<BootstrapJobRun>> {
        self.get(BOOTSTRAP_RUNS, &run_key(store, id))
    }

    /// All runs of a store, oldest first.
    pub fn list_runs(&self, store: &str) -> StateResult<Vec<BootstrapJobRun>> {
        self.scan(BOOTSTRAP_RUNS, &format!("{store}:"))
    }

    /// Every run in the ledger.
    pub fn list_all_runs(&self) -> StateResult<Vec<BootstrapJobRun>> {
        self.scan(BOOTSTRAP_RUNS, "")
    }

    /// Most recent run of a store.
    pub fn latest_run(&self, store: &str) -> StateResult<Option<BootstrapJobRun>> {
        Ok(self.list_runs(store)?.pop())
    }

    // ── Bootstrap leases ───────────────────────────────────────────

    /// Try to take the bootstrap lease for `store`.
    ///
    /// Succeeds when no lease exists, the existing lease expired, or
    /// `holder` already holds it (the lease is then extended).
    pub fn try_acquire_lease(
        &self,
        store: &str,
        holder: &str,
        ttl_secs: u64,
        now: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BOOTSTRAP_LEASES).map_err(map_err!(Table))?;
            let current: Option<BootstrapLease> = match table.get(store).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            if let Some(lease) = current
                && lease.holder != holder
                && lease.expires_at > now
            {
                debug!(%store, holder = %lease.holder, "bootstrap lease held elsewhere");
                return Ok(false);
            }

            let lease = BootstrapLease {
                store: store.to_string(),
                holder: holder.to_string(),
                acquired_at: now,
                expires_at: now.saturating_add(ttl_secs),
            };
            let value = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
            table
                .insert(store, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%store, %holder, "bootstrap lease acquired");
        Ok(true)
    }

    /// Release the lease if `holder` owns it. Returns true if released.
    pub fn release_lease(&self, store: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(BOOTSTRAP_LEASES).map_err(map_err!(Table))?;
            let owned = match table.get(store).map_err(map_err!(Read))? {
                Some(guard) => {
                    let lease: BootstrapLease =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    lease.holder == holder
                }
                None => false,
            };
            if owned {
                table.remove(store).map_err(map_err!(Write))?;
            }
            released = owned;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(released)
    }

    pub fn get_lease(&self, store: &str) -> StateResult<Option<BootstrapLease>> {
        self.get(BOOTSTRAP_LEASES, store)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Record the launch phase of a service.
    pub fn put_service_record(&self, record: &ServiceRecord) -> StateResult<()> {
        self.put(SERVICES, &record.name, record)
    }

    pub fn get_service_record(&self, name: &str) -> StateResult<Option<ServiceRecord>> {
        self.get(SERVICES, name)
    }

    pub fn list_service_records(&self) -> StateResult<Vec<ServiceRecord>> {
        self.scan(SERVICES, "")
    }

    // ── Certificates ───────────────────────────────────────────────

    pub fn put_certificate_status(&self, status: &CertificateStatus) -> StateResult<()> {
        self.put(CERTIFICATES, &status.name, status)
    }

    pub fn get_certificate_status(&self, name: &str) -> StateResult<Option<CertificateStatus>> {
        self.get(CERTIFICATES, name)
    }
}
