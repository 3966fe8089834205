//! Secret source URI resolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Where the orchestrator obtains a secret before mounting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecretSource {
    /// Local file: file:///run/secrets/db.properties or /abs/path
    File { path: PathBuf },
    /// Remote provider over TLS: https://vault.example.com/v1/sync/db
    Https { url: String },
    /// Local provider socket: unix:///run/provider.sock#db
    Unix { socket: PathBuf, key: Option<String> },
}

impl SecretSource {
    /// Parse a secret source. Plaintext network schemes are rejected so
    /// secret material never crosses an unencrypted channel.
    pub fn parse(secret: &str, uri: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidSecretSource {
            secret: secret.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(invalid("empty file path"));
            }
            Ok(SecretSource::File { path: PathBuf::from(path) })
        } else if uri.starts_with("https://") {
            Ok(SecretSource::Https { url: uri.to_string() })
        } else if let Some(rest) = uri.strip_prefix("unix://") {
            let (socket, key) = match rest.split_once('#') {
                Some((socket, key)) => (socket, Some(key.to_string())),
                None => (rest, None),
            };
            if socket.is_empty() {
                return Err(invalid("empty socket path"));
            }
            Ok(SecretSource::Unix { socket: PathBuf::from(socket), key })
        } else if uri.starts_with("http://") {
            Err(invalid("plaintext http is not allowed for secret material"))
        } else if uri.contains("://") {
            Err(invalid("unsupported scheme"))
        } else if uri.starts_with('/') || uri.starts_with("./") {
            Ok(SecretSource::File { path: PathBuf::from(uri) })
        } else {
            Err(invalid("expected file://, https://, unix:// or a path"))
        }
    }

    pub fn is_external(&self) -> bool {
        !matches!(self, SecretSource::File { .. })
    }
}
