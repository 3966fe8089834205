//! syncstack-secrets: pre-start checks for a service's credentials.
//!
//! Before a service's main process is started the launcher calls
//! [`verify_service`]. Every secret the service consumes must resolve to a
//! non-empty regular file and every key listed in `required_env` must have a
//! non-empty value. Nothing is started when either check fails.

pub mod error;
pub mod mount;
pub mod settings;

pub use error::{MissingMount, SecretError, SecretResult};
pub use mount::{MountedSecret, MountedSecrets, SecretMount, fingerprint, resolve_mounts, verify_mounts};
pub use settings::verify_settings;

use std::collections::BTreeMap;
use std::path::Path;

use syncstack_core::{ServiceDescriptor, StackConfig};

/// Run both checks for `service`. Secret problems are reported before
/// setting problems.
pub fn verify_service(
    config: &StackConfig,
    service: &ServiceDescriptor,
    env: &BTreeMap<String, String>,
    base_dir: &Path,
) -> SecretResult<MountedSecrets> {
    let mounts = resolve_mounts(config, &service.name, base_dir)?;
    let secrets = verify_mounts(&service.name, &mounts)?;
    verify_settings(service, env)?;
    Ok(secrets)
}
