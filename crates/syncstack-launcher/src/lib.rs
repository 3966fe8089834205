//! syncstack-launcher: dependency-ordered stack launch.
//!
//! Starts the services of a [`StackConfig`](syncstack_core::StackConfig)
//! so that no service starts before every service it depends on is ready.
//!
//! # Architecture
//!
//! ```text
//! Launcher
//!   ├── DependencyGraph (topological order, transitive dependents)
//!   ├── pre-start checks (syncstack-secrets) for every service
//!   ├── one task per service
//!   │     wait on ReadinessBoard → verify mounts → ServiceRunner::start / run_job
//!   │     → probe until ready → publish Ready / Failed / Cancelled
//!   └── StateStore (optional, records ServicePhase per service)
//! ```

pub mod error;
pub mod launcher;
pub mod runner;

pub use error::{LaunchError, LaunchResult};
pub use launcher::{LaunchReport, LaunchTimings, Launcher, service_environments};
pub use runner::{LaunchSpec, ProcessRunner, RunFuture, ServiceRunner};
