use std::path::PathBuf;

use thiserror::Error;

pub type SecretResult<T> = Result<T, SecretError>;

/// A single unusable secret mount.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingMount {
    pub secret: String,
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for MissingMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {} ({})", self.secret, self.path.display(), self.reason)
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    /// One or more secrets of `service` are absent or empty.
    #[error("missing secret for {service}: {}", join(missing))]
    MissingSecret {
        service: String,
        missing: Vec<MissingMount>,
    },

    /// Required environment keys without a non-empty value.
    #[error("missing setting for {service}: {}", keys.join(", "))]
    MissingSetting { service: String, keys: Vec<String> },

    /// A mounted secret changed while its consumer was running.
    #[error("secret {secret} of {service} changed; restart {service} to pick it up")]
    SecretChanged { service: String, secret: String },

    #[error("invalid secret source: {0}")]
    Source(#[from] syncstack_core::CoreError),
}

fn join(missing: &[MissingMount]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
