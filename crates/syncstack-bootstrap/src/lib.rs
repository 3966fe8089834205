//! syncstack-bootstrap: the one-shot store initializer.
//!
//! A bootstrap run moves through `pending → running → succeeded | failed`
//! and is recorded in the state ledger. The store itself carries the
//! completion marker, so re-running against an initialized store adopts the
//! earlier result without touching it.
//!
//! # Components
//!
//! - **`target`**: what the job does to a store (`BootstrapTarget`,
//!   `CommandTarget`)
//! - **`job`**: placement, lease and run state machine (`BootstrapJob`)

pub mod error;
pub mod job;
pub mod target;

pub use error::{BootstrapError, BootstrapResult};
pub use job::{BootstrapJob, RunMode};
pub use target::{BootstrapTarget, CommandTarget, TargetFuture};
