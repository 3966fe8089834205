//! syncstack-core: shared model for the SyncStack bootstrap protocol.
//!
//! Holds the service/network/secret descriptors, the `stack.toml`
//! configuration, the dependency graph used by the launcher, and small
//! helpers (durations, env files) shared by every other crate.

pub mod config;
pub mod duration;
pub mod envfile;
pub mod error;
pub mod graph;
pub mod source;
pub mod types;

pub use config::StackConfig;
pub use duration::parse_duration;
pub use envfile::EnvFile;
pub use error::{CoreError, CoreResult};
pub use graph::DependencyGraph;
pub use source::SecretSource;
pub use types::*;
