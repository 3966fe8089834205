//! Runner used by `syncstackd up`.
//!
//! Daemons and ordinary jobs run as child processes. The configured
//! bootstrap service is not spawned as a command; it runs the
//! [`BootstrapJob`] state machine in-process so the ledger sees the run.

use std::path::{Path, PathBuf};

use tracing::info;

use syncstack_bootstrap::{BootstrapJob, CommandTarget};
use syncstack_core::config::{BootstrapSettings, merge_env};
use syncstack_launcher::{LaunchError, LaunchResult, LaunchSpec, ProcessRunner, RunFuture, ServiceRunner};
use syncstack_state::StateStore;

struct BootstrapService {
    settings: BootstrapSettings,
    base_dir: PathBuf,
    node: String,
    state: StateStore,
}

impl BootstrapService {
    async fn run(&self, spec: &LaunchSpec) -> LaunchResult<()> {
        let mut env = spec.env.clone();
        env.extend(merge_env(
            &self.settings.env_files,
            &self.settings.env,
            &self.base_dir,
        )?);
        let target = CommandTarget::new(
            &self.settings.store_address,
            self.settings.commands.clone(),
            env,
        );
        let job = BootstrapJob::new(&self.settings.store, &self.node, self.state.clone(), target)
            .with_coordinator(self.settings.coordinator.clone())
            .with_lease_ttl(self.settings.lease_ttl()?);

        match job.run().await {
            Ok(run) => {
                info!(
                    service = %spec.name(),
                    run_id = run.id,
                    adopted = run.adopted,
                    repaired = run.repaired,
                    "bootstrap complete"
                );
                Ok(())
            }
            Err(e) => Err(LaunchError::Job {
                service: spec.name().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

pub struct StackRunner {
    processes: ProcessRunner,
    bootstrap: Option<BootstrapService>,
}

impl StackRunner {
    pub fn new(processes: ProcessRunner) -> Self {
        Self {
            processes,
            bootstrap: None,
        }
    }

    /// Run `settings.service` as the bootstrap job on `node`.
    pub fn with_bootstrap(
        mut self,
        settings: BootstrapSettings,
        base_dir: &Path,
        node: &str,
        state: StateStore,
    ) -> Self {
        self.bootstrap = Some(BootstrapService {
            settings,
            base_dir: base_dir.to_path_buf(),
            node: node.to_string(),
            state,
        });
        self
    }

    fn bootstrap_for(&self, service: &str) -> Option<&BootstrapService> {
        self.bootstrap
            .as_ref()
            .filter(|b| b.settings.service == service)
    }
}

impl ServiceRunner for StackRunner {
    fn start<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
        self.processes.start(spec)
    }

    fn run_job<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
        match self.bootstrap_for(spec.name()) {
            Some(bootstrap) => Box::pin(bootstrap.run(spec)),
            None => self.processes.run_job(spec),
        }
    }

    fn shutdown(&self) -> RunFuture<'_, ()> {
        self.processes.shutdown()
    }
}
