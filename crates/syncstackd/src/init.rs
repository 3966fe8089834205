//! `syncstackd init`: first-run configuration without prompts.
//!
//! Writes the HTTPS domain and admin contact into `https.env`, optionally
//! sets the directory admin password in `ldap.env`, and puts a certificate
//! bundle in place, either copied from an existing directory or
//! self-signed.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Args;
use regex::Regex;
use tracing::{info, warn};

use syncstack_core::EnvFile;
use syncstack_core::envfile::HttpsSettings;
use syncstack_proxy::generate_self_signed;

const LDAP_ADMIN_PASSWORD: &str = "LDAP_ADMIN_PASSWORD";
const BUNDLE_FILES: [&str; 2] = ["fullchain.pem", "privkey.pem"];

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory holding https.env and ldap.env.
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Directory the proxy reads fullchain.pem and privkey.pem from.
    #[arg(long, default_value = "certs")]
    pub cert_dir: PathBuf,

    /// Public domain name of the installation.
    #[arg(long)]
    pub domain: Option<String>,

    /// Contact address for certificate registration.
    #[arg(long)]
    pub email: Option<String>,

    /// Custom directory admin password.
    #[arg(long)]
    pub ldap_admin_password: Option<String>,

    /// Serve plain HTTP only. Requires --insecure.
    #[arg(long)]
    pub no_https: bool,

    /// Acknowledge that the server will run without TLS.
    #[arg(long)]
    pub insecure: bool,

    /// Copy fullchain.pem and privkey.pem from this directory.
    #[arg(long, conflicts_with = "self_signed")]
    pub existing_certs: Option<PathBuf>,

    /// Generate a self-signed certificate for --domain.
    #[arg(long)]
    pub self_signed: bool,
}

#[derive(Debug, PartialEq)]
pub struct InitOutcome {
    pub https: bool,
    pub domain: Option<String>,
    pub password_lines: usize,
    pub copied: Vec<PathBuf>,
}

pub fn run(args: &InitArgs) -> anyhow::Result<InitOutcome> {
    let https = !args.no_https;
    if !https && !args.insecure {
        bail!(
            "refusing to disable HTTPS: a plain HTTP server exposes user credentials; \
             pass --insecure to do it anyway"
        );
    }

    let https_env = args.config_dir.join("https.env");
    let mut env = EnvFile::load(&https_env).with_context(|| {
        format!(
            "no https configuration at {}; certificates cannot be renewed without it",
            https_env.display()
        )
    })?;
    let mut settings = HttpsSettings::from_env_file(&env);
    if let Some(domain) = &args.domain {
        settings.domain = Some(domain.clone());
    }
    if let Some(email) = &args.email {
        settings.admin_email = Some(email.clone());
    }
    settings.apply(&mut env);
    env.save()?;
    info!(path = ?https_env, domain = ?settings.domain, "https settings written");

    let password_lines = match &args.ldap_admin_password {
        Some(password) => set_ldap_password(&args.config_dir.join("ldap.env"), password)?,
        None => 0,
    };

    let mut copied = Vec::new();
    if https {
        std::fs::create_dir_all(&args.cert_dir)
            .with_context(|| format!("creating {}", args.cert_dir.display()))?;
        if let Some(source) = &args.existing_certs {
            copied = copy_bundle(source, &args.cert_dir)?;
        } else if args.self_signed {
            let Some(domain) = settings.domain.as_deref() else {
                bail!("--self-signed needs a domain (--domain or HTTPS_DOMAIN in https.env)");
            };
            copied = write_self_signed(domain, &args.cert_dir)?;
        }
    } else {
        warn!("HTTPS disabled; do not expose this server to the internet");
    }

    Ok(InitOutcome {
        https,
        domain: settings.domain,
        password_lines,
        copied,
    })
}

/// Replace every `LDAP_ADMIN_PASSWORD=` line, appending one when absent.
fn set_ldap_password(path: &Path, password: &str) -> anyhow::Result<usize> {
    if password.is_empty() {
        bail!("LDAP admin password must not be empty");
    }
    let mut env = EnvFile::load(path)?;
    let pattern = Regex::new(r"^\s*LDAP_ADMIN_PASSWORD=.*$")?;
    let assignment = format!("{LDAP_ADMIN_PASSWORD}={password}");
    let mut changed = env.replace_matching(&pattern, &assignment);
    if changed == 0 {
        env.set(LDAP_ADMIN_PASSWORD, password);
        changed = 1;
    }
    env.save()?;
    info!(path = ?path, "ldap admin password set");
    Ok(changed)
}

fn copy_bundle(source: &Path, target: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    for file in BUNDLE_FILES {
        let from = source.join(file);
        let to = target.join(file);
        if !from.is_file() {
            warn!(path = ?from, "certificate file not found; copy it manually before starting the proxy");
            continue;
        }
        std::fs::copy(&from, &to)
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        restrict(&to)?;
        info!(from = ?from, to = ?to, "certificate file copied");
        copied.push(to);
    }
    Ok(copied)
}

fn write_self_signed(domain: &str, target: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let pair = generate_self_signed(domain)?;
    let fullchain = target.join(BUNDLE_FILES[0]);
    let key = target.join(BUNDLE_FILES[1]);
    std::fs::write(&fullchain, pair.cert_pem)
        .with_context(|| format!("writing {}", fullchain.display()))?;
    std::fs::write(&key, pair.key_pem).with_context(|| format!("writing {}", key.display()))?;
    restrict(&fullchain)?;
    restrict(&key)?;
    Ok(vec![fullchain, key])
}

#[cfg(unix)]
fn restrict(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("setting mode 0600 on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
