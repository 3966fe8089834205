//! syncstack-health: readiness checking for SyncStack.
//!
//! Provides TCP and HTTP readiness probes, fixed-interval polling with a
//! deadline, and the readiness board the launcher uses to gate dependents.
//!
//! # Architecture
//!
//! ```text
//! Launcher task (per service)
//!   ├── wait_ready(probe) → polls every poll_interval until ready or timeout
//!   └── ReadinessBoard::set(service, Ready | Unready | Failed | Cancelled)
//!
//! Dependent task
//!   └── ReadinessBoard::wait_for(dependency, timeout)
//! ```
//!
//! Polling uses a fixed interval, never exponential backoff.

pub mod board;
pub mod checker;
pub mod error;

pub use board::{ReadinessBoard, ReadinessState};
pub use checker::{Probe, ProbeFn, ProbeFuture, ProbeResult, ReadinessTracker, http_probe, tcp_probe, wait_ready};
pub use error::{ReadinessError, ReadinessResult};
