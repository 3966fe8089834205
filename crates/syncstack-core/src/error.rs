//! Error types for stack configuration and graph validation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading or validating a stack description.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse stack config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("service {service} references unknown {kind} {name}")]
    UnknownReference {
        service: String,
        kind: &'static str,
        name: String,
    },

    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    #[error("service {service} depends on {dependency}, which is disabled by feature {feature}")]
    DisabledDependency {
        service: String,
        dependency: String,
        feature: String,
    },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("service {service} cannot reach dependency {dependency}: no shared network")]
    Unreachable { service: String, dependency: String },

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("invalid secret source for {secret}: {reason}")]
    InvalidSecretSource { secret: String, reason: String },

    #[error("invalid stack config: {0}")]
    Invalid(String),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}
