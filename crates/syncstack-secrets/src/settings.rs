//! Required environment settings.

use std::collections::BTreeMap;

use syncstack_core::ServiceDescriptor;

use crate::error::{SecretError, SecretResult};

/// Every `required_env` key must map to a non-blank value in `env`.
pub fn verify_settings(
    service: &ServiceDescriptor,
    env: &BTreeMap<String, String>,
) -> SecretResult<()> {
    let keys: Vec<String> = service
        .required_env
        .iter()
        .filter(|key| env.get(*key).is_none_or(|v| v.trim().is_empty()))
        .cloned()
        .collect();

    if keys.is_empty() {
        Ok(())
    } else {
        Err(SecretError::MissingSetting {
            service: service.name.clone(),
            keys,
        })
    }
}
