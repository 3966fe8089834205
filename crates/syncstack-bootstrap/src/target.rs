//! Operations the bootstrap job performs against a store.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use syncstack_core::config::{BootstrapCommands, BootstrapSettings, merge_env};

use crate::error::{BootstrapError, BootstrapResult};

/// Boxed future returned by [`BootstrapTarget`] operations.
pub type TargetFuture<'a, T> = Pin<Box<dyn Future<Output = BootstrapResult<T>> + Send + 'a>>;

/// A store the bootstrap job initializes.
///
/// Implementations must make `initialize` and `write_marker` safe to run
/// again after `repair` has cleaned up whatever a failed run left behind.
pub trait BootstrapTarget: Send + Sync {
    /// Store reachable and accepting authentication.
    fn check_entry(&self) -> TargetFuture<'_, ()>;

    /// The completion marker of an earlier successful run is present.
    fn has_marker(&self) -> TargetFuture<'_, bool>;

    /// Schema state exists without a completion marker.
    fn detect_partial(&self) -> TargetFuture<'_, bool>;

    /// Remove partial state so `initialize` starts from a clean store.
    fn repair(&self) -> TargetFuture<'_, ()>;

    /// Apply schema and seed data.
    fn initialize(&self) -> TargetFuture<'_, ()>;

    /// Durably record completion in the store.
    fn write_marker(&self) -> TargetFuture<'_, ()>;
}

/// Runs the configured commands against the store.
///
/// Exit status 0 means yes / ok. Commands inherit only the job
/// environment, never the launcher's own variables.
#[derive(Debug, Clone)]
pub struct CommandTarget {
    store_address: String,
    commands: BootstrapCommands,
    env: BTreeMap<String, String>,
    connect_timeout: Duration,
}

impl CommandTarget {
    pub fn new(
        store_address: &str,
        commands: BootstrapCommands,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            store_address: store_address.to_string(),
            commands,
            env,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_settings(settings: &BootstrapSettings, base_dir: &Path) -> BootstrapResult<Self> {
        let env = merge_env(&settings.env_files, &settings.env, base_dir)?;
        Ok(Self::new(&settings.store_address, settings.commands.clone(), env))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn run(&self, step: &'static str, argv: &[String]) -> BootstrapResult<Output> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BootstrapError::step(step, "no command configured"))?;
        debug!(step, %program, "running bootstrap command");
        Command::new(program)
            .args(args)
            .env_clear()
            .envs(&self.env)
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BootstrapError::step(step, format!("{program}: {e}")))
    }

    /// Exit status as a yes/no answer. An empty command answers no.
    async fn ask(&self, step: &'static str, argv: &[String]) -> BootstrapResult<bool> {
        if argv.is_empty() {
            return Ok(false);
        }
        Ok(self.run(step, argv).await?.status.success())
    }

    async fn must_succeed(&self, step: &'static str, argv: &[String]) -> BootstrapResult<()> {
        let output = self.run(step, argv).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        Err(BootstrapError::step(
            step,
            format!("{} {}", output.status, detail).trim_end().to_string(),
        ))
    }
}

impl BootstrapTarget for CommandTarget {
    fn check_entry(&self) -> TargetFuture<'_, ()> {
        Box::pin(async move {
            let connect = tokio::net::TcpStream::connect(&self.store_address);
            match tokio::time::timeout(self.connect_timeout, connect).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(BootstrapError::step("check_entry", e.to_string())),
                Err(_) => {
                    return Err(BootstrapError::step(
                        "check_entry",
                        format!("connect to {} timed out", self.store_address),
                    ));
                }
            }
            if self.commands.check_entry.is_empty() {
                return Ok(());
            }
            self.must_succeed("check_entry", &self.commands.check_entry).await
        })
    }

    fn has_marker(&self) -> TargetFuture<'_, bool> {
        Box::pin(self.ask("has_marker", &self.commands.has_marker))
    }

    fn detect_partial(&self) -> TargetFuture<'_, bool> {
        Box::pin(self.ask("detect_partial", &self.commands.detect_partial))
    }

    fn repair(&self) -> TargetFuture<'_, ()> {
        Box::pin(self.must_succeed("repair", &self.commands.repair))
    }

    fn initialize(&self) -> TargetFuture<'_, ()> {
        Box::pin(self.must_succeed("initialize", &self.commands.initialize))
    }

    fn write_marker(&self) -> TargetFuture<'_, ()> {
        Box::pin(self.must_succeed("write_marker", &self.commands.write_marker))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn target(dir: &Path, address: &str) -> CommandTarget {
        let marker = dir.join("marker");
        let schema = dir.join("schema");
        let commands = BootstrapCommands {
            check_entry: Vec::new(),
            has_marker: sh(&format!("test -f {}", marker.display())),
            detect_partial: sh(&format!("test -f {}", schema.display())),
            repair: sh(&format!("rm -f {}", schema.display())),
            initialize: sh(&format!("echo \"$SCHEMA_VERSION\" > {}", schema.display())),
            write_marker: sh(&format!("touch {}", marker.display())),
        };
        let env = BTreeMap::from([("SCHEMA_VERSION".to_string(), "7".to_string())]);
        CommandTarget::new(address, commands, env).with_connect_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn commands_answer_by_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let t = target(dir.path(), "127.0.0.1:1");

        assert!(!t.has_marker().await.unwrap());
        assert!(!t.detect_partial().await.unwrap());

        t.initialize().await.unwrap();
        assert!(t.detect_partial().await.unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("schema")).unwrap().trim(),
            "7"
        );

        t.repair().await.unwrap();
        assert!(!t.detect_partial().await.unwrap());

        t.write_marker().await.unwrap();
        assert!(t.has_marker().await.unwrap());
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = target(dir.path(), "127.0.0.1:1");
        t.commands.initialize = sh("echo 'relation exists' >&2; exit 3");

        let err = t.initialize().await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("initialize failed"), "{message}");
        assert!(message.contains("relation exists"), "{message}");
    }

    #[tokio::test]
    async fn missing_program_is_a_step_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = target(dir.path(), "127.0.0.1:1");
        t.commands.write_marker = vec!["/nonexistent/syncstack-marker".to_string()];
        assert!(matches!(
            t.write_marker().await,
            Err(BootstrapError::Step { step: "write_marker", .. })
        ));
    }

    #[tokio::test]
    async fn entry_requires_reachable_store() {
        let dir = tempfile::tempdir().unwrap();
        let unreachable = target(dir.path(), "127.0.0.1:1");
        assert!(unreachable.check_entry().await.is_err());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let reachable = target(dir.path(), &addr);
        reachable.check_entry().await.unwrap();

        let mut rejecting = target(dir.path(), &addr);
        rejecting.commands.check_entry = sh("exit 1");
        assert!(rejecting.check_entry().await.is_err());
    }
}
