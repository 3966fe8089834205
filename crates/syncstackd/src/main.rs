//! syncstackd: the SyncStack daemon.
//!
//! Single binary over the SyncStack crates:
//! - `check` validates `stack.toml` and every service's secrets
//! - `up` launches the stack in dependency order (and the TLS terminator
//!   when the `https` feature is on)
//! - `bootstrap` runs the store bootstrap job once
//! - `proxy` runs only the TLS terminator
//! - `status` dumps the ledger
//! - `init` writes first-run configuration
//!
//! # Usage
//!
//! ```text
//! syncstackd up --config stack.toml --data-dir /var/lib/syncstack
//! ```

mod exit;
mod init;
mod runner;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use syncstack_bootstrap::{BootstrapJob, CommandTarget};
use syncstack_core::config::ProxySettings;
use syncstack_core::{CoreError, StackConfig};
use syncstack_health::ReadinessState;
use syncstack_launcher::{Launcher, ProcessRunner, ServiceRunner};
use syncstack_proxy::{CERTIFICATE_NAME, CertificateBundle, ReloadHandle, RunningTerminator, TlsTerminator};
use syncstack_secrets::verify_service;
use syncstack_state::{BootstrapJobRun, BootstrapLease, CertificateStatus, ServiceRecord, StateStore};

use crate::runner::StackRunner;

const DEFAULT_LOG_FILTER: &str = "info,syncstackd=debug,syncstack=debug";
const LEDGER_FILE: &str = "syncstack.redb";

#[derive(Parser)]
#[command(name = "syncstackd", about = "SyncStack daemon", version)]
struct Cli {
    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the stack and check every service's secrets and settings.
    Check {
        #[arg(long, default_value = "stack.toml")]
        config: PathBuf,
    },

    /// Launch the stack in dependency order and run until Ctrl-C.
    Up {
        #[arg(long, default_value = "stack.toml")]
        config: PathBuf,

        /// Directory holding the ledger.
        #[arg(long, default_value = "/var/lib/syncstack")]
        data_dir: PathBuf,

        /// Name of this node, checked against the bootstrap coordinator.
        #[arg(long, default_value = "local")]
        node: String,
    },

    /// Run the store bootstrap job once.
    Bootstrap {
        #[arg(long, default_value = "stack.toml")]
        config: PathBuf,

        #[arg(long, default_value = "/var/lib/syncstack")]
        data_dir: PathBuf,

        #[arg(long, default_value = "local")]
        node: String,

        /// Start a new run after a failed one, repairing partial state.
        #[arg(long)]
        retry: bool,
    },

    /// Run the HTTP redirect server and the HTTPS terminator. SIGHUP
    /// reloads the certificate immediately.
    Proxy {
        #[arg(long, default_value = "stack.toml")]
        config: PathBuf,

        #[arg(long, default_value = "/var/lib/syncstack")]
        data_dir: PathBuf,
    },

    /// Print the ledger as JSON.
    Status {
        #[arg(long, default_value = "/var/lib/syncstack")]
        data_dir: PathBuf,
    },

    /// Write first-run configuration.
    Init(init::InitArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Command::Check { config } => check(&config),
        Command::Up {
            config,
            data_dir,
            node,
        } => up(&config, &data_dir, &node).await,
        Command::Bootstrap {
            config,
            data_dir,
            node,
            retry,
        } => bootstrap(&config, &data_dir, &node, retry).await,
        Command::Proxy { config, data_dir } => proxy(&config, &data_dir).await,
        Command::Status { data_dir } => status(&data_dir),
        Command::Init(args) => init::run(&args).map(|outcome| {
            println!(
                "https: {}, domain: {}, certificate files: {}",
                if outcome.https { "enforced" } else { "DISABLED" },
                outcome.domain.as_deref().unwrap_or("-"),
                outcome.copied.len()
            );
        }),
    };

    exit::exit_code(result)
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Parse and validate the stack. Relative paths in it resolve against the
/// directory holding the file.
fn load_config(path: &Path) -> anyhow::Result<(StackConfig, PathBuf)> {
    let config = StackConfig::from_file(path)?;
    config.validate()?;
    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    info!(path = ?path, stack = %config.stack.name, "stack config loaded");
    Ok((config, base_dir))
}

fn open_state(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join(LEDGER_FILE);
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "ledger opened");
    Ok(state)
}

fn proxy_settings(config: &StackConfig, base_dir: &Path) -> anyhow::Result<ProxySettings> {
    let mut settings = config
        .proxy
        .clone()
        .ok_or_else(|| CoreError::Invalid("stack has no [proxy] section".to_string()))?;
    settings.certificate.fullchain = base_dir.join(&settings.certificate.fullchain);
    settings.certificate.private_key = base_dir.join(&settings.certificate.private_key);
    settings.acme_webroot = base_dir.join(&settings.acme_webroot);
    Ok(settings)
}

/// Flip `tx` on Ctrl-C.
fn shutdown_on_ctrl_c(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        tx.send_replace(true);
    });
}

#[cfg(unix)]
fn reload_on_sighup(handle: ReloadHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading certificate");
            handle.trigger();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn reload_on_sighup(_handle: ReloadHandle) -> anyhow::Result<()> {
    Ok(())
}

async fn start_terminator(
    settings: ProxySettings,
    state: StateStore,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<RunningTerminator> {
    let running = TlsTerminator::new(settings)
        .with_state(state)
        .start(shutdown)
        .await?;
    reload_on_sighup(running.reload_handle())?;
    Ok(running)
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let graph = config.dependency_graph()?;

    println!("stack {}: {} services", config.stack.name, graph.len());
    for (i, layer) in graph.layers().iter().enumerate() {
        println!("  layer {i}: {}", layer.join(", "));
    }

    let mut failures = Vec::new();
    for service in config.active_services() {
        let env = config.service_env(service, &base_dir)?;
        match verify_service(&config, service, &env, &base_dir) {
            Ok(secrets) if secrets.is_empty() => println!("  ok    {}", service.name),
            Ok(secrets) => println!("  ok    {} ({} secrets)", service.name, secrets.env().len()),
            Err(e) => {
                println!("  FAIL  {}: {e}", service.name);
                failures.push(e);
            }
        }
    }

    let certificate = if config.features.https {
        let settings = proxy_settings(&config, &base_dir)?;
        match CertificateBundle::load(&settings.certificate) {
            Ok(bundle) => {
                println!("  certificate {} ok", bundle.fingerprint);
                None
            }
            Err(e) => {
                println!("  FAIL  certificate: {e}");
                Some(e)
            }
        }
    } else {
        None
    };

    if let Some(e) = failures.into_iter().next() {
        return Err(e.into());
    }
    match certificate {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn up(config_path: &Path, data_dir: &Path, node: &str) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let state = open_state(data_dir)?;

    let processes = ProcessRunner::new(config.launch.restart_delay()?, config.launch.max_restarts);
    let mut runner = StackRunner::new(processes);
    if let Some(settings) = config.bootstrap.clone() {
        runner = runner.with_bootstrap(settings, &base_dir, node, state.clone());
    }
    // The terminator needs a certificate; nothing starts without one.
    let proxy = if config.features.https {
        let settings = proxy_settings(&config, &base_dir)?;
        CertificateBundle::load(&settings.certificate)?;
        Some(settings)
    } else {
        None
    };
    let launcher = Launcher::new(config, &base_dir, Arc::new(runner))?.with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_on_ctrl_c(shutdown_tx);

    let report = launcher.launch(shutdown_rx.clone()).await?;
    for (service, readiness) in launcher.board().snapshot().await {
        match readiness {
            ReadinessState::Ready => info!(%service, "ready"),
            ReadinessState::Pending => info!(%service, "pending"),
            ReadinessState::Failed(reason) => warn!(%service, %reason, "failed"),
            ReadinessState::Cancelled(reason) => warn!(%service, %reason, "not started"),
        }
    }

    if !report.is_success() || *shutdown_rx.borrow() {
        launcher.runner().shutdown().await?;
        report.into_result()?;
        return Ok(());
    }
    info!(ready = report.ready.len(), "stack is up");

    let terminator = match proxy {
        Some(settings) => match start_terminator(settings, state, shutdown_rx.clone()).await {
            Ok(running) => Some(running),
            Err(e) => {
                launcher.runner().shutdown().await?;
                return Err(e);
            }
        },
        None => None,
    };

    let mut shutdown = shutdown_rx;
    let _ = shutdown.wait_for(|stop| *stop).await;

    launcher.runner().shutdown().await?;
    if let Some(terminator) = terminator {
        terminator.wait().await?;
    }
    info!("stack stopped");
    Ok(())
}

async fn bootstrap(config_path: &Path, data_dir: &Path, node: &str, retry: bool) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let Some(settings) = config.bootstrap else {
        return Err(CoreError::Invalid("stack has no [bootstrap] section".to_string()).into());
    };
    let state = open_state(data_dir)?;

    let target = CommandTarget::from_settings(&settings, &base_dir)?;
    let job = BootstrapJob::new(&settings.store, node, state, target)
        .with_coordinator(settings.coordinator.clone())
        .with_lease_ttl(settings.lease_ttl()?);

    let run = if retry { job.retry().await? } else { job.run().await? };
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn proxy(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let settings = proxy_settings(&config, &base_dir)?;
    let state = open_state(data_dir)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_on_ctrl_c(shutdown_tx);

    let running = start_terminator(settings, state, shutdown_rx).await?;
    running.wait().await?;
    info!("proxy stopped");
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    runs: Vec<BootstrapJobRun>,
    leases: Vec<BootstrapLease>,
    services: Vec<ServiceRecord>,
    certificate: Option<CertificateStatus>,
}

fn status(data_dir: &Path) -> anyhow::Result<()> {
    let db_path = data_dir.join(LEDGER_FILE);
    if !db_path.exists() {
        bail!("no ledger at {}", db_path.display());
    }
    let state = StateStore::open(&db_path)?;

    let runs = state.list_all_runs()?;
    let stores: BTreeSet<&str> = runs.iter().map(|r| r.store.as_str()).collect();
    let mut leases = Vec::new();
    for store in stores {
        if let Some(lease) = state.get_lease(store)? {
            leases.push(lease);
        }
    }

    let report = StatusReport {
        leases,
        services: state.list_service_records()?,
        certificate: state.get_certificate_status(CERTIFICATE_NAME)?,
        runs,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
