//! redb table definitions for the SyncStack ledger.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Every ledger table: string keys, JSON values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Bootstrap job runs keyed by `{store}:{run_id:020}`.
pub const BOOTSTRAP_RUNS: JsonTable = TableDefinition::new("bootstrap_runs");

/// Bootstrap leases keyed by `{store}`.
pub const BOOTSTRAP_LEASES: JsonTable = TableDefinition::new("bootstrap_leases");

/// Launch records keyed by `{service}`.
pub const SERVICES: JsonTable = TableDefinition::new("services");

/// Certificate status keyed by bundle name.
pub const CERTIFICATES: JsonTable = TableDefinition::new("certificates");
