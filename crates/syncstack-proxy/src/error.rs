//! Proxy error types.

use std::path::PathBuf;

use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The bundle on disk is missing or unusable. The previously installed
    /// bundle, if any, stays active.
    #[error("certificate reload failed for {path}: {reason}")]
    CertificateReloadFailed { path: PathBuf, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream {upstream} failed: {reason}")]
    Upstream { upstream: String, reason: String },

    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("configuration error: {0}")]
    Config(#[from] syncstack_core::CoreError),

    #[error("state store error: {0}")]
    State(#[from] syncstack_state::StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub(crate) fn reload(path: &std::path::Path, reason: impl Into<String>) -> Self {
        ProxyError::CertificateReloadFailed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
