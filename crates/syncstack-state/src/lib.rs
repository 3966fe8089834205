//! syncstack-state: the SyncStack ledger.
//!
//! Backed by [redb](https://docs.rs/redb), records bootstrap job runs,
//! the bootstrap lease that keeps runs exclusive, per-service launch
//! phases, and the certificate status reported by the proxy.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Bootstrap runs use `{store}:{run_id:020}` keys so a prefix scan returns
//! the runs of one store in creation order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
