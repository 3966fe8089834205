//! Launcher: starts a stack in dependency order.
//!
//! Every active service gets its own task. A task waits until each of its
//! dependencies is ready on the [`ReadinessBoard`], verifies its secrets and
//! settings, starts the service and probes it until ready. Independent
//! services therefore start concurrently, and a service never starts before
//! everything it depends on reports ready.
//!
//! When a service never becomes ready, its dependents are cancelled without
//! being attempted and one `DependencyTimeout` names all of them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use syncstack_core::config::LaunchSettings;
use syncstack_core::{CoreResult, ServiceDescriptor, StackConfig};
use syncstack_health::{Probe, ReadinessBoard, ReadinessError, ReadinessState, wait_ready};
use syncstack_secrets::verify_service;
use syncstack_state::{ServicePhase, ServiceRecord, StateStore, epoch_secs};

use crate::error::{LaunchError, LaunchResult};
use crate::runner::{LaunchSpec, ServiceRunner};

/// Readiness timings, parsed from `[launch]`.
#[derive(Debug, Clone, Copy)]
pub struct LaunchTimings {
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl LaunchTimings {
    pub fn from_settings(settings: &LaunchSettings) -> CoreResult<Self> {
        Ok(Self {
            readiness_timeout: settings.readiness_timeout()?,
            poll_interval: settings.poll_interval()?,
            probe_timeout: settings.probe_timeout()?,
        })
    }
}

/// How one service's launch task ended.
#[derive(Debug)]
enum Outcome {
    Ready,
    TimedOut(Duration),
    Failed(LaunchError),
    Cancelled,
}

/// Result of a launch.
#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Services in the order they were started.
    pub started: Vec<String>,
    pub ready: Vec<String>,
    /// Services not attempted because a dependency was unavailable or the
    /// launch was shut down.
    pub cancelled: Vec<String>,
    /// In topological order of the failing service.
    pub errors: Vec<LaunchError>,
}

impl LaunchReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.cancelled.is_empty()
    }

    /// The first error, if any.
    pub fn into_result(mut self) -> LaunchResult<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(self.errors.remove(0))
        }
    }
}

pub struct Launcher<R> {
    config: Arc<StackConfig>,
    base_dir: PathBuf,
    runner: Arc<R>,
    board: ReadinessBoard,
    timings: LaunchTimings,
    state: Option<StateStore>,
    probes: Arc<HashMap<String, Probe>>,
    started: Arc<Mutex<Vec<String>>>,
}

impl<R> Clone for Launcher<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            base_dir: self.base_dir.clone(),
            runner: self.runner.clone(),
            board: self.board.clone(),
            timings: self.timings,
            state: self.state.clone(),
            probes: self.probes.clone(),
            started: self.started.clone(),
        }
    }
}

impl<R: ServiceRunner + 'static> Launcher<R> {
    /// `base_dir` resolves relative env file and secret paths.
    pub fn new(config: StackConfig, base_dir: &Path, runner: Arc<R>) -> LaunchResult<Self> {
        let timings = LaunchTimings::from_settings(&config.launch)?;
        Ok(Self {
            config: Arc::new(config),
            base_dir: base_dir.to_path_buf(),
            runner,
            board: ReadinessBoard::new(),
            timings,
            state: None,
            probes: Arc::new(HashMap::new()),
            started: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Record service phases in the ledger.
    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_timings(mut self, timings: LaunchTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Use `probe` instead of the service's declared readiness check.
    pub fn with_probe(mut self, service: &str, probe: Probe) -> Self {
        Arc::make_mut(&mut self.probes).insert(service.to_string(), probe);
        self
    }

    pub fn board(&self) -> &ReadinessBoard {
        &self.board
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    /// Launch every active service. Returns when each service is ready,
    /// failed, or cancelled. Setting `shutdown` to `true` cancels services
    /// that have not finished launching.
    pub async fn launch(&self, shutdown: watch::Receiver<bool>) -> LaunchResult<LaunchReport> {
        let graph = self.config.dependency_graph()?;
        let order = graph.topological_order();

        let preflight = self.preflight(&order);
        if !preflight.is_empty() {
            warn!(failures = preflight.len(), "pre-start checks failed, nothing started");
            return Ok(LaunchReport {
                errors: preflight,
                ..LaunchReport::default()
            });
        }

        for name in &order {
            self.board.register(name).await;
            self.record(name, ServicePhase::Pending, None);
        }
        info!(services = order.len(), "launching stack");

        let mut tasks = JoinSet::new();
        for name in &order {
            let launcher = self.clone();
            let name = name.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let outcome = launcher.launch_service(&name, shutdown).await;
                (name, outcome)
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    outcomes.insert(name, outcome);
                }
                Err(e) => warn!(error = %e, "launch task panicked"),
            }
        }

        let mut report = LaunchReport {
            started: self.started_order(),
            ..LaunchReport::default()
        };
        for name in &order {
            match outcomes.remove(name) {
                Some(Outcome::Ready) => report.ready.push(name.clone()),
                Some(Outcome::Cancelled) | None => report.cancelled.push(name.clone()),
                Some(Outcome::Failed(e)) => report.errors.push(e),
                Some(Outcome::TimedOut(waited)) => {
                    let blocked: Vec<String> =
                        graph.transitive_dependents(name).into_iter().collect();
                    if blocked.is_empty() {
                        report.errors.push(LaunchError::NotReady {
                            service: name.clone(),
                            waited,
                        });
                    } else {
                        report.errors.push(LaunchError::DependencyTimeout {
                            dependency: name.clone(),
                            waited,
                            blocked,
                        });
                    }
                }
            }
        }

        info!(
            ready = report.ready.len(),
            cancelled = report.cancelled.len(),
            errors = report.errors.len(),
            "launch finished"
        );
        Ok(report)
    }

    /// Verify secrets and settings of every service before anything starts.
    fn preflight(&self, order: &[String]) -> Vec<LaunchError> {
        let mut errors = Vec::new();
        for name in order {
            let Some(svc) = self.config.service(name) else {
                continue;
            };
            if let Err(e) = self.verified_spec(svc) {
                warn!(service = %name, error = %e, "pre-start check failed");
                errors.push(e);
            }
        }
        errors
    }

    fn verified_spec(&self, svc: &ServiceDescriptor) -> LaunchResult<LaunchSpec> {
        let mut env = self.config.service_env(svc, &self.base_dir)?;
        let secrets = verify_service(&self.config, svc, &env, &self.base_dir)?;
        env.extend(secrets.env());
        Ok(LaunchSpec {
            service: svc.clone(),
            env,
            secrets,
        })
    }

    async fn launch_service(&self, name: &str, mut shutdown: watch::Receiver<bool>) -> Outcome {
        let Some(svc) = self.config.service(name).cloned() else {
            return Outcome::Cancelled;
        };

        self.record(name, ServicePhase::Waiting, None);
        let dependencies = async {
            for dep in &svc.depends_on {
                self.board.wait_for(dep).await?;
                debug!(service = %name, dependency = %dep, "dependency ready");
            }
            Ok::<(), ReadinessError>(())
        };

        let waited = tokio::select! {
            result = dependencies => result,
            _ = shutdown_signalled(&mut shutdown) => {
                return self.cancel(name, "shutdown").await;
            }
        };
        if let Err(e) = waited {
            return self.cancel(name, &e.to_string()).await;
        }

        let outcome = tokio::select! {
            outcome = self.start_and_probe(&svc) => outcome,
            _ = shutdown_signalled(&mut shutdown) => {
                return self.cancel(name, "shutdown").await;
            }
        };

        let state = match &outcome {
            Outcome::Ready => {
                self.record(name, ServicePhase::Ready, None);
                ReadinessState::Ready
            }
            Outcome::TimedOut(waited) => {
                let reason = format!("not ready after {waited:?}");
                warn!(service = %name, %reason, "service never became ready");
                self.record(name, ServicePhase::Failed, Some(reason.clone()));
                ReadinessState::Failed(reason)
            }
            Outcome::Failed(e) => {
                warn!(service = %name, error = %e, "service failed");
                self.record(name, ServicePhase::Failed, Some(e.to_string()));
                ReadinessState::Failed(e.to_string())
            }
            Outcome::Cancelled => ReadinessState::Cancelled("cancelled".to_string()),
        };
        if let Err(e) = self.board.set(name, state).await {
            warn!(service = %name, error = %e, "readiness board update failed");
        }
        outcome
    }

    async fn start_and_probe(&self, svc: &ServiceDescriptor) -> Outcome {
        self.record(&svc.name, ServicePhase::Starting, None);

        // Mounts are checked again right before exec.
        let spec = match self.verified_spec(svc) {
            Ok(spec) => spec,
            Err(e) => return Outcome::Failed(e),
        };

        if let Ok(mut started) = self.started.lock() {
            started.push(svc.name.clone());
        }

        // A job is ready once it exits, and must do so within the readiness timeout.
        if svc.is_job() {
            let waited = self.timings.readiness_timeout;
            return match tokio::time::timeout(waited, self.runner.run_job(&spec)).await {
                Ok(Ok(())) => Outcome::Ready,
                Ok(Err(e)) => Outcome::Failed(e),
                Err(_) => Outcome::TimedOut(waited),
            };
        }

        if let Err(e) = self.runner.start(&spec).await {
            return Outcome::Failed(e);
        }

        let probe = match self.probes.get(&svc.name) {
            Some(probe) => probe.clone(),
            None => match &svc.readiness {
                Some(readiness) => Probe::from_config(readiness, self.timings.probe_timeout),
                None => return Outcome::Ready,
            },
        };

        match wait_ready(&probe, self.timings.poll_interval, self.timings.readiness_timeout).await {
            Ok(_) => Outcome::Ready,
            Err(ReadinessError::Timeout { waited, .. }) => Outcome::TimedOut(waited),
            Err(e) => Outcome::Failed(LaunchError::Start {
                service: svc.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn cancel(&self, name: &str, reason: &str) -> Outcome {
        debug!(service = %name, %reason, "launch cancelled");
        self.record(name, ServicePhase::Cancelled, Some(reason.to_string()));
        if let Err(e) = self
            .board
            .set(name, ReadinessState::Cancelled(reason.to_string()))
            .await
        {
            warn!(service = %name, error = %e, "readiness board update failed");
        }
        Outcome::Cancelled
    }

    fn record(&self, name: &str, phase: ServicePhase, detail: Option<String>) {
        let Some(state) = &self.state else {
            return;
        };
        let record = ServiceRecord {
            name: name.to_string(),
            phase,
            detail,
            updated_at: epoch_secs(),
        };
        if let Err(e) = state.put_service_record(&record) {
            warn!(service = %name, error = %e, "failed to record service phase");
        }
    }

    fn started_order(&self) -> Vec<String> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Effective environment of every active service, for inspection.
pub fn service_environments(
    config: &StackConfig,
    base_dir: &Path,
) -> CoreResult<BTreeMap<String, BTreeMap<String, String>>> {
    config
        .active_services()
        .map(|svc| Ok((svc.name.clone(), config.service_env(svc, base_dir)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use syncstack_health::ProbeResult;

    use crate::runner::RunFuture;

    const STACK: &str = r#"
[stack]
name = "syncldap"

[features]
https = false

[[network]]
name = "db-network"

[[network]]
name = "ldap-network"

[[network]]
name = "sync-network"

[[service]]
name = "db"
image = "postgres:9.6"
networks = ["db-network"]
required_env = ["POSTGRES_PASSWORD"]
env = { POSTGRES_PASSWORD = "odk" }

[[service]]
name = "ldap-service"
image = "odk/openldap"
networks = ["ldap-network"]

[[service]]
name = "db-bootstrap"
image = "odk/db-bootstrap"
kind = "job"
networks = ["db-network"]
depends_on = ["db"]

[[service]]
name = "sync"
image = "odk/sync-endpoint"
networks = ["db-network", "ldap-network", "sync-network"]
depends_on = ["db", "db-bootstrap", "ldap-service"]

[[service]]
name = "web-ui"
image = "odk/sync-web-ui"
networks = ["sync-network"]
depends_on = ["sync"]

[[secret]]
name = "dbconfig"
source = "./jdbc.properties"
mount_path = "/run/secrets/jdbc.properties"
consumers = ["sync"]
"#;

    /// Records starts and fails the test's invariant if a service starts
    /// before its dependencies are ready.
    #[derive(Default)]
    struct FakeRunner {
        ready: Mutex<HashSet<String>>,
        deps: HashMap<String, Vec<String>>,
        violations: Mutex<Vec<String>>,
        starts: Mutex<Vec<String>>,
        failing_jobs: HashSet<String>,
        hanging_jobs: HashSet<String>,
    }

    impl FakeRunner {
        fn new(config: &StackConfig) -> Self {
            Self {
                deps: config
                    .services
                    .iter()
                    .map(|s| (s.name.clone(), s.depends_on.iter().cloned().collect()))
                    .collect(),
                ..Self::default()
            }
        }

        fn mark_ready(&self, name: &str) {
            self.ready.lock().unwrap().insert(name.to_string());
        }

        fn check_order(&self, name: &str) {
            let ready = self.ready.lock().unwrap();
            for dep in self.deps.get(name).into_iter().flatten() {
                if !ready.contains(dep) {
                    self.violations
                        .lock()
                        .unwrap()
                        .push(format!("{name} started before {dep}"));
                }
            }
            self.starts.lock().unwrap().push(name.to_string());
        }

        fn starts(&self) -> Vec<String> {
            self.starts.lock().unwrap().clone()
        }
    }

    impl ServiceRunner for FakeRunner {
        fn start<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
            Box::pin(async move {
                self.check_order(spec.name());
                Ok(())
            })
        }

        fn run_job<'a>(&'a self, spec: &'a LaunchSpec) -> RunFuture<'a, ()> {
            Box::pin(async move {
                self.check_order(spec.name());
                if self.hanging_jobs.contains(spec.name()) {
                    std::future::pending::<()>().await;
                }
                tokio::time::sleep(Duration::from_millis(300)).await;
                if self.failing_jobs.contains(spec.name()) {
                    return Err(LaunchError::Job {
                        service: spec.name().to_string(),
                        reason: "exit status: 1".to_string(),
                    });
                }
                self.mark_ready(spec.name());
                Ok(())
            })
        }

        fn shutdown(&self) -> RunFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Ready after `polls` probes; marks the runner's ready set when it is.
    fn probe(runner: &Arc<FakeRunner>, name: &str, polls: u32) -> Probe {
        let runner = runner.clone();
        let count = Arc::new(AtomicU32::new(0));
        let service = name.to_string();
        Probe::custom(name, move || {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = n >= polls;
            if ready {
                runner.mark_ready(&service);
            }
            async move {
                if ready { ProbeResult::Ready } else { ProbeResult::Failed }
            }
        })
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: StackConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jdbc.properties"), "jdbc.url=jdbc:postgresql://db/odk\n")
            .unwrap();
        let mut config = StackConfig::from_toml_str(STACK).unwrap();
        config.launch.readiness_timeout = "10s".to_string();
        config.launch.poll_interval = "1s".to_string();
        config.validate().unwrap();
        Fixture { dir, config }
    }

    fn launcher(fx: &Fixture, runner: &Arc<FakeRunner>, db_polls: u32) -> Launcher<FakeRunner> {
        Launcher::new(fx.config.clone(), fx.dir.path(), runner.clone())
            .unwrap()
            .with_probe("db", probe(runner, "db", db_polls))
            .with_probe("ldap-service", probe(runner, "ldap-service", 2))
            .with_probe("sync", probe(runner, "sync", 3))
            .with_probe("web-ui", probe(runner, "web-ui", 1))
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test(start_paused = true)]
    async fn services_start_only_after_dependencies_are_ready() {
        let fx = fixture();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let launcher = launcher(&fx, &runner, 4);

        let report = launcher.launch(no_shutdown()).await.unwrap();

        assert!(report.is_success(), "{report:?}");
        assert!(runner.violations.lock().unwrap().is_empty(), "{:?}", runner.violations);
        assert_eq!(report.ready.len(), 5);

        let starts = runner.starts();
        let pos = |n: &str| starts.iter().position(|s| s == n).unwrap();
        assert!(pos("db") < pos("db-bootstrap"));
        assert!(pos("db-bootstrap") < pos("sync"));
        assert!(pos("ldap-service") < pos("sync"));
        assert!(pos("sync") < pos("web-ui"));
        assert_eq!(report.started, starts);
    }

    #[tokio::test(start_paused = true)]
    async fn unready_store_reports_one_dependency_timeout() {
        let fx = fixture();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let launcher = launcher(&fx, &runner, u32::MAX);

        let report = launcher.launch(no_shutdown()).await.unwrap();

        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        match &report.errors[0] {
            LaunchError::DependencyTimeout {
                dependency,
                waited,
                blocked,
            } => {
                assert_eq!(dependency, "db");
                assert_eq!(*waited, Duration::from_secs(10));
                assert_eq!(blocked, &vec!["db-bootstrap", "sync", "web-ui"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let starts = runner.starts();
        assert!(!starts.contains(&"db-bootstrap".to_string()));
        assert!(!starts.contains(&"sync".to_string()));
        assert!(!starts.contains(&"web-ui".to_string()));
        assert_eq!(report.ready, vec!["ldap-service"]);
        assert_eq!(report.cancelled, vec!["db-bootstrap", "sync", "web-ui"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_cancels_dependents_silently() {
        let fx = fixture();
        let mut fake = FakeRunner::new(&fx.config);
        fake.failing_jobs.insert("db-bootstrap".to_string());
        let runner = Arc::new(fake);
        let launcher = launcher(&fx, &runner, 1);

        let report = launcher.launch(no_shutdown()).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(&report.errors[0], LaunchError::Job { service, .. } if service == "db-bootstrap"));
        assert_eq!(report.cancelled, vec!["sync", "web-ui"]);
        assert!(!runner.starts().contains(&"sync".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn job_that_never_exits_times_out_its_dependents() {
        let fx = fixture();
        let mut fake = FakeRunner::new(&fx.config);
        fake.hanging_jobs.insert("db-bootstrap".to_string());
        let runner = Arc::new(fake);
        let launcher = launcher(&fx, &runner, 1);

        let report = tokio::time::timeout(Duration::from_secs(3600), launcher.launch(no_shutdown()))
            .await
            .expect("launch returns once the job's readiness timeout elapses")
            .unwrap();

        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        match &report.errors[0] {
            LaunchError::DependencyTimeout {
                dependency,
                waited,
                blocked,
            } => {
                assert_eq!(dependency, "db-bootstrap");
                assert_eq!(*waited, Duration::from_secs(10));
                assert_eq!(blocked, &vec!["sync", "web-ui"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(report.cancelled, vec!["sync", "web-ui"]);
        assert!(!runner.starts().contains(&"sync".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_secret_prevents_any_start() {
        let fx = fixture();
        std::fs::write(fx.dir.path().join("jdbc.properties"), "").unwrap();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let launcher = launcher(&fx, &runner, 1);

        let report = launcher.launch(no_shutdown()).await.unwrap();

        assert!(runner.starts().is_empty());
        assert!(report.started.is_empty());
        assert_eq!(report.errors.len(), 1);
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Secret(syncstack_secrets::SecretError::MissingSecret { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_setting_prevents_any_start() {
        let mut fx = fixture();
        fx.config.services[0].env.clear();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let launcher = launcher(&fx, &runner, 1);

        let report = launcher.launch(no_shutdown()).await.unwrap();
        assert!(runner.starts().is_empty());
        assert!(matches!(
            &report.errors[0],
            LaunchError::Secret(syncstack_secrets::SecretError::MissingSetting { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_services() {
        let fx = fixture();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let launcher = launcher(&fx, &runner, u32::MAX);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { launcher.launch(rx).await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send_replace(true);

        let report = handle.await.unwrap().unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.cancelled.contains(&"db".to_string()));
        assert!(report.cancelled.contains(&"sync".to_string()));
        assert!(!runner.starts().contains(&"sync".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn phases_are_recorded_in_the_ledger() {
        let fx = fixture();
        let runner = Arc::new(FakeRunner::new(&fx.config));
        let state = StateStore::open_in_memory().unwrap();
        let launcher = launcher(&fx, &runner, u32::MAX).with_state(state.clone());

        launcher.launch(no_shutdown()).await.unwrap();

        let db = state.get_service_record("db").unwrap().unwrap();
        assert_eq!(db.phase, ServicePhase::Failed);
        let sync = state.get_service_record("sync").unwrap().unwrap();
        assert_eq!(sync.phase, ServicePhase::Cancelled);
        let ldap = state.get_service_record("ldap-service").unwrap().unwrap();
        assert_eq!(ldap.phase, ServicePhase::Ready);
    }

    #[test]
    fn environments_merge_env_files() {
        let fx = fixture();
        std::fs::write(fx.dir.path().join("db.env"), "POSTGRES_USER=odk\nPOSTGRES_PASSWORD=x\n").unwrap();
        let mut config = fx.config.clone();
        config.services[0].env_files = vec![PathBuf::from("db.env")];

        let envs = service_environments(&config, fx.dir.path()).unwrap();
        assert_eq!(envs["db"]["POSTGRES_USER"], "odk");
        assert_eq!(envs["db"]["POSTGRES_PASSWORD"], "odk");
        assert!(envs["web-ui"].is_empty());
    }
}
