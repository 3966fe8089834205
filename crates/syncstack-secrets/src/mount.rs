//! Secret mount resolution and verification.
//!
//! A file-backed secret is read straight from its source path. Secrets from
//! an external provider are materialized by the orchestrator at their
//! `mount_path`, so that path is what gets checked.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use syncstack_core::{SecretSource, StackConfig};

use crate::error::{MissingMount, SecretError, SecretResult};

/// Where a consumer finds one of its secrets.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretMount {
    pub secret: String,
    pub path: PathBuf,
}

impl SecretMount {
    /// Environment variable through which the path is handed to the process.
    pub fn env_var(&self) -> String {
        let name: String = self
            .secret
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("SYNCSTACK_SECRET_{name}")
    }
}

/// A verified mount and the SHA-256 of its content at verification time.
#[derive(Debug, Clone, PartialEq)]
pub struct MountedSecret {
    pub mount: SecretMount,
    pub fingerprint: String,
}

/// All verified secrets of one service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MountedSecrets {
    pub service: String,
    pub secrets: Vec<MountedSecret>,
}

impl MountedSecrets {
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// `SYNCSTACK_SECRET_<NAME>=<path>` for every secret.
    pub fn env(&self) -> BTreeMap<String, String> {
        self.secrets
            .iter()
            .map(|s| (s.mount.env_var(), s.mount.path.display().to_string()))
            .collect()
    }

    /// Secrets are not rotated live: any content change since verification
    /// is reported so the consumer can be restarted.
    pub fn verify_unchanged(&self) -> SecretResult<()> {
        for secret in &self.secrets {
            let current = fs::read(&secret.mount.path).ok().map(|b| fingerprint(&b));
            if current.as_deref() != Some(secret.fingerprint.as_str()) {
                return Err(SecretError::SecretChanged {
                    service: self.service.clone(),
                    secret: secret.mount.secret.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Mount locations of every secret consumed by `service`.
pub fn resolve_mounts(
    config: &StackConfig,
    service: &str,
    base_dir: &Path,
) -> SecretResult<Vec<SecretMount>> {
    config
        .secrets_for(service)
        .map(|secret| {
            let path = match SecretSource::parse(&secret.name, &secret.source)? {
                SecretSource::File { path } if path.is_absolute() => path,
                SecretSource::File { path } => base_dir.join(path),
                SecretSource::Https { .. } | SecretSource::Unix { .. } => secret.mount_path.clone(),
            };
            Ok(SecretMount {
                secret: secret.name.clone(),
                path,
            })
        })
        .collect()
}

/// Check every mount, collecting all problems before failing.
pub fn verify_mounts(service: &str, mounts: &[SecretMount]) -> SecretResult<MountedSecrets> {
    let mut missing = Vec::new();
    let mut secrets = Vec::new();

    for mount in mounts {
        match inspect(mount) {
            Ok(fingerprint) => secrets.push(MountedSecret {
                mount: mount.clone(),
                fingerprint,
            }),
            Err(reason) => missing.push(MissingMount {
                secret: mount.secret.clone(),
                path: mount.path.clone(),
                reason,
            }),
        }
    }

    if !missing.is_empty() {
        return Err(SecretError::MissingSecret {
            service: service.to_string(),
            missing,
        });
    }

    debug!(%service, count = secrets.len(), "secrets verified");
    Ok(MountedSecrets {
        service: service.to_string(),
        secrets,
    })
}

fn inspect(mount: &SecretMount) -> Result<String, String> {
    let meta = match fs::metadata(&mount.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err("absent".to_string()),
        Err(e) => return Err(e.to_string()),
    };
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if meta.len() == 0 {
        return Err("empty".to_string());
    }
    if !meta.permissions().readonly() {
        warn!(secret = %mount.secret, path = ?mount.path, "secret mount is writable");
    }

    let content = fs::read(&mount.path).map_err(|e| e.to_string())?;
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err("empty".to_string());
    }
    Ok(fingerprint(&content))
}
