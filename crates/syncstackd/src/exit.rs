//! Process exit codes.

use std::process::ExitCode;

use syncstack_bootstrap::BootstrapError;
use syncstack_core::CoreError;
use syncstack_launcher::LaunchError;
use syncstack_proxy::ProxyError;
use syncstack_secrets::SecretError;

pub const GENERIC: u8 = 1;
pub const MISSING_SECRET: u8 = 2;
pub const DEPENDENCY_TIMEOUT: u8 = 3;
pub const BOOTSTRAP_FAILURE: u8 = 4;
pub const CONFIG: u8 = 5;

/// Exit code for the first domain error in `err`'s chain.
pub fn code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<LaunchError>() {
            return match e {
                LaunchError::DependencyTimeout { .. } | LaunchError::NotReady { .. } => {
                    DEPENDENCY_TIMEOUT
                }
                LaunchError::Secret(_) => MISSING_SECRET,
                LaunchError::Job { .. } => BOOTSTRAP_FAILURE,
                LaunchError::Config(_) => CONFIG,
                _ => GENERIC,
            };
        }
        if cause.downcast_ref::<SecretError>().is_some() {
            return MISSING_SECRET;
        }
        if let Some(e) = cause.downcast_ref::<BootstrapError>() {
            return match e {
                BootstrapError::Config(_) => CONFIG,
                _ => BOOTSTRAP_FAILURE,
            };
        }
        if let Some(ProxyError::Config(_) | ProxyError::CertificateReloadFailed { .. }) =
            cause.downcast_ref::<ProxyError>()
        {
            return CONFIG;
        }
        if cause.downcast_ref::<CoreError>().is_some() {
            return CONFIG;
        }
    }
    GENERIC
}

pub fn exit_code(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "syncstackd failed");
            eprintln!("error: {e:#}");
            ExitCode::from(code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn launch_errors_map_to_their_codes() {
        let timeout = anyhow::Error::from(LaunchError::DependencyTimeout {
            dependency: "db".to_string(),
            waited: Duration::from_secs(60),
            blocked: vec!["sync".to_string()],
        });
        assert_eq!(code_for(&timeout), DEPENDENCY_TIMEOUT);

        let secret = anyhow::Error::from(LaunchError::Secret(SecretError::MissingSetting {
            service: "db".to_string(),
            keys: vec!["POSTGRES_PASSWORD".to_string()],
        }));
        assert_eq!(code_for(&secret), MISSING_SECRET);

        let job = anyhow::Error::from(LaunchError::Job {
            service: "db-bootstrap".to_string(),
            reason: "exit status 1".to_string(),
        });
        assert_eq!(code_for(&job), BOOTSTRAP_FAILURE);
    }

    #[test]
    fn context_does_not_hide_the_cause() {
        let err = anyhow::Error::from(BootstrapError::AlreadyRunning {
            store: "db".to_string(),
            holder: "node-2/1/0".to_string(),
        })
        .context("bootstrap");
        assert_eq!(code_for(&err), BOOTSTRAP_FAILURE);

        let config = anyhow::Error::from(CoreError::Invalid("no [proxy] section".to_string()))
            .context("loading stack.toml");
        assert_eq!(code_for(&config), CONFIG);
    }

    #[test]
    fn unusable_certificate_is_a_config_error() {
        let err = anyhow::Error::from(ProxyError::CertificateReloadFailed {
            path: "certs/fullchain.pem".into(),
            reason: "No such file or directory".to_string(),
        });
        assert_eq!(code_for(&err), CONFIG);
    }

    #[test]
    fn unknown_errors_are_generic() {
        assert_eq!(code_for(&anyhow::anyhow!("boom")), GENERIC);
    }
}
