//! Process execution behind the launcher.
//!
//! The launcher decides *when* a service may start; a [`ServiceRunner`]
//! decides *how*. [`ProcessRunner`] runs each service's `command` as a
//! local child process and supervises it according to its restart policy.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use syncstack_core::{RestartPolicy, ServiceDescriptor};
use syncstack_secrets::MountedSecrets;

use crate::error::{LaunchError, LaunchResult};

/// Boxed future returned by [`ServiceRunner`] operations.
pub type RunFuture<'a, T> = Pin<Box<dyn Future<Output = LaunchResult<T>> + Send + 'a>>;

/// Everything a runner needs to start one service.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub service: ServiceDescriptor,
    /// Merged env files and `env`, plus one `SYNCSTACK_SECRET_*` per secret.
    pub env: BTreeMap<String, String>,
    pub secrets: MountedSecrets,
}

impl LaunchSpec {
    pub fn name(&self) -> &str {
        &self.service.name
    }
}

pub trait ServiceRunner: Send + Sync {
    /// Start a daemon. Returns once it is running; readiness is probed
    /// separately.
    fn start<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()>;

    /// Run a job to completion. `Ok` means it exited successfully.
    fn run_job<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()>;

    /// Stop everything this runner started.
    fn shutdown(&self) -> RunFuture<'_, ()>;
}

/// Runs services as local child processes.
pub struct ProcessRunner {
    restart_delay: Duration,
    max_restarts: u32,
    shutdown_tx: watch::Sender<bool>,
    supervisors: Mutex<JoinSet<()>>,
}

impl ProcessRunner {
    pub fn new(restart_delay: Duration, max_restarts: u32) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            restart_delay,
            max_restarts,
            shutdown_tx,
            supervisors: Mutex::new(JoinSet::new()),
        }
    }

    /// Number of supervised daemons still running.
    pub async fn running(&self) -> usize {
        self.supervisors.lock().await.len()
    }
}

fn spawn(spec: &LaunchSpec) -> LaunchResult<Child> {
    let (program, args) =
        spec.service
            .command
            .split_first()
            .ok_or_else(|| LaunchError::Start {
                service: spec.name().to_string(),
                reason: "no command configured".to_string(),
            })?;

    Command::new(program)
        .args(args)
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .envs(&spec.env)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LaunchError::Start {
            service: spec.name().to_string(),
            reason: format!("{program}: {e}"),
        })
}

impl ServiceRunner for ProcessRunner {
    fn start<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
        Box::pin(async move {
            let child = spawn(spec)?;
            info!(service = %spec.name(), pid = ?child.id(), "service started");

            let supervisor = Supervisor {
                spec: spec.clone(),
                restart_delay: self.restart_delay,
                max_restarts: self.max_restarts,
                shutdown: self.shutdown_tx.subscribe(),
            };
            self.supervisors.lock().await.spawn(supervisor.run(child));
            Ok(())
        })
    }

    fn run_job<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
        Box::pin(async move {
            let mut restarts = 0;
            loop {
                let mut child = spawn(spec)?;
                info!(job = %spec.name(), pid = ?child.id(), "job started");
                let status = child.wait().await.map_err(|e| LaunchError::Job {
                    service: spec.name().to_string(),
                    reason: e.to_string(),
                })?;
                if status.success() {
                    info!(job = %spec.name(), "job completed");
                    return Ok(());
                }
                if !spec.service.restart.should_restart(false) || restarts >= self.max_restarts {
                    return Err(LaunchError::Job {
                        service: spec.name().to_string(),
                        reason: status.to_string(),
                    });
                }
                restarts += 1;
                warn!(job = %spec.name(), %status, restarts, "job failed, retrying");
                tokio::time::sleep(self.restart_delay).await;
            }
        })
    }

    fn shutdown(&self) -> RunFuture<'_, ()> {
        Box::pin(async move {
            self.shutdown_tx.send_replace(true);
            let mut supervisors = self.supervisors.lock().await;
            while supervisors.join_next().await.is_some() {}
            info!("all services stopped");
            Ok(())
        })
    }
}

/// Keeps one daemon running according to its restart policy.
struct Supervisor {
    spec: LaunchSpec,
    restart_delay: Duration,
    max_restarts: u32,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self, mut child: Child) {
        let name = self.spec.name().to_string();
        let mut restarts = 0;
        loop {
            tokio::select! {
                status = child.wait() => {
                    let succeeded = matches!(&status, Ok(s) if s.success());
                    if *self.shutdown.borrow() {
                        return;
                    }
                    if !policy_allows(self.spec.service.restart, succeeded, restarts, self.max_restarts) {
                        warn!(service = %name, ?status, restarts, "service exited, not restarting");
                        return;
                    }
                    restarts += 1;
                    warn!(service = %name, ?status, restarts, "service exited, restarting");

                    tokio::select! {
                        _ = tokio::time::sleep(self.restart_delay) => {}
                        _ = self.shutdown.changed() => return,
                    }
                    child = match spawn(&self.spec) {
                        Ok(child) => child,
                        Err(e) => {
                            error!(service = %name, error = %e, "restart failed");
                            return;
                        }
                    };
                }
                _ = self.shutdown.changed() => {
                    debug!(service = %name, "stopping service");
                    if let Err(e) = child.kill().await {
                        warn!(service = %name, error = %e, "failed to kill service");
                    }
                    return;
                }
            }
        }
    }
}

fn policy_allows(policy: RestartPolicy, succeeded: bool, restarts: u32, max_restarts: u32) -> bool {
    policy.should_restart(succeeded) && restarts < max_restarts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, command: &[&str], restart: RestartPolicy) -> LaunchSpec {
        let mut service: ServiceDescriptor =
            toml::from_str(&format!("name = \"{name}\"\nimage = \"local\"")).unwrap();
        service.command = command.iter().map(|s| s.to_string()).collect();
        service.restart = restart;
        LaunchSpec {
            service,
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
            secrets: MountedSecrets::default(),
        }
    }

    #[test]
    fn restart_policy_and_limit() {
        assert!(policy_allows(RestartPolicy::Always, true, 0, 5));
        assert!(!policy_allows(RestartPolicy::OnFailure, true, 0, 5));
        assert!(policy_allows(RestartPolicy::OnFailure, false, 4, 5));
        assert!(!policy_allows(RestartPolicy::OnFailure, false, 5, 5));
        assert!(!policy_allows(RestartPolicy::None, false, 0, 5));
    }

    #[tokio::test]
    async fn empty_command_cannot_start() {
        let runner = ProcessRunner::new(Duration::from_millis(10), 0);
        let s = spec("web-ui", &[], RestartPolicy::None);
        assert!(matches!(
            runner.start(&s).await,
            Err(LaunchError::Start { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn job_sees_its_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = format!("echo \"$GREETING\" > {}", out.display());
        let runner = ProcessRunner::new(Duration::from_millis(10), 0);

        runner
            .run_job(&spec("db-bootstrap", &["sh", "-c", &script], RestartPolicy::None))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_job_is_retried_on_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("count");
        // Fails until it has run three times.
        let script = format!(
            "echo x >> {0}; test $(wc -l < {0}) -ge 3",
            count.display()
        );
        let runner = ProcessRunner::new(Duration::from_millis(10), 5);
        runner
            .run_job(&spec("db-bootstrap", &["sh", "-c", &script], RestartPolicy::OnFailure))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(count).unwrap().lines().count(), 3);

        let never = ProcessRunner::new(Duration::from_millis(10), 5);
        assert!(matches!(
            never
                .run_job(&spec("db-bootstrap", &["sh", "-c", "exit 2"], RestartPolicy::None))
                .await,
            Err(LaunchError::Job { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_stops_daemons() {
        let runner = ProcessRunner::new(Duration::from_millis(10), 5);
        runner
            .start(&spec("db", &["sleep", "30"], RestartPolicy::Always))
            .await
            .unwrap();
        assert_eq!(runner.running().await, 1);

        tokio::time::timeout(Duration::from_secs(5), runner.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runner.running().await, 0);
    }
}
