//! stack.toml configuration parser.
//!
//! A stack file declares every service, network, secret and volume, plus
//! the launch timings, the bootstrap job and the reverse proxy. Optional
//! parts of the stack are switched with `[features]` instead of being
//! commented in and out.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::envfile::EnvFile;
use crate::error::{CoreError, CoreResult};
use crate::graph::DependencyGraph;
use crate::source::SecretSource;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackMeta,
    #[serde(default)]
    pub features: StackFeatures,
    #[serde(default)]
    pub launch: LaunchSettings,
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkSegment>,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default, rename = "secret")]
    pub secrets: Vec<SecretMaterial>,
    #[serde(default, rename = "volume")]
    pub volumes: Vec<VolumeSpec>,
    pub bootstrap: Option<BootstrapSettings>,
    pub proxy: Option<ProxySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackMeta {
    pub name: String,
}

/// Launcher timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSettings {
    /// How long a dependent waits for a dependency to become ready.
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout: String,
    /// Fixed delay between readiness probes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Timeout of a single probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
    /// Delay before a daemon is restarted by the process runner.
    #[serde(default = "default_restart_delay")]
    pub restart_delay: String,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_readiness_timeout() -> String {
    "120s".to_string()
}
fn default_poll_interval() -> String {
    "2s".to_string()
}
fn default_probe_timeout() -> String {
    "2s".to_string()
}
fn default_restart_delay() -> String {
    "5s".to_string()
}
fn default_max_restarts() -> u32 {
    5
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            readiness_timeout: default_readiness_timeout(),
            poll_interval: default_poll_interval(),
            probe_timeout: default_probe_timeout(),
            restart_delay: default_restart_delay(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl LaunchSettings {
    pub fn readiness_timeout(&self) -> CoreResult<Duration> {
        duration_field("launch.readiness_timeout", &self.readiness_timeout)
    }

    pub fn poll_interval(&self) -> CoreResult<Duration> {
        duration_field("launch.poll_interval", &self.poll_interval)
    }

    pub fn probe_timeout(&self) -> CoreResult<Duration> {
        duration_field("launch.probe_timeout", &self.probe_timeout)
    }

    pub fn restart_delay(&self) -> CoreResult<Duration> {
        duration_field("launch.restart_delay", &self.restart_delay)
    }
}

/// The one-shot store initializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSettings {
    /// Name of the `job` service that runs the bootstrap.
    pub service: String,
    /// Name of the store service the job initializes.
    pub store: String,
    /// host:port used to check the store is reachable.
    pub store_address: String,
    /// Only this node may run the job.
    #[serde(default)]
    pub coordinator: Option<String>,
    /// Lease lifetime guarding against concurrent runs.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub env_files: Vec<PathBuf>,
    pub commands: BootstrapCommands,
}

fn default_lease_ttl() -> String {
    "10m".to_string()
}

impl BootstrapSettings {
    pub fn lease_ttl(&self) -> CoreResult<Duration> {
        duration_field("bootstrap.lease_ttl", &self.lease_ttl)
    }
}

/// Commands run against the store. Exit status 0 means yes / ok.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapCommands {
    /// Authenticate against the store.
    #[serde(default)]
    pub check_entry: Vec<String>,
    /// Exit 0 when the completion marker is present.
    pub has_marker: Vec<String>,
    /// Exit 0 when partial, unmarked schema state is present.
    #[serde(default)]
    pub detect_partial: Vec<String>,
    /// Undo partial schema state.
    #[serde(default)]
    pub repair: Vec<String>,
    /// Apply schema and seed data.
    pub initialize: Vec<String>,
    /// Record the completion marker.
    pub write_marker: Vec<String>,
}

/// Reverse proxy / TLS terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    #[serde(default = "default_https_listen")]
    pub https_listen: String,
    /// Used in redirects when a request carries no Host header.
    #[serde(default)]
    pub public_host: Option<String>,
    pub certificate: CertificatePaths,
    #[serde(default = "default_reload_interval")]
    pub reload_interval: String,
    /// Directory holding `.well-known/acme-challenge/<token>` files.
    pub acme_webroot: PathBuf,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: String,
    #[serde(default)]
    pub min_tls_version: TlsVersion,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteSpec>,
}

fn default_http_listen() -> String {
    "0.0.0.0:80".to_string()
}
fn default_https_listen() -> String {
    "0.0.0.0:443".to_string()
}
fn default_reload_interval() -> String {
    "12h".to_string()
}
fn default_max_body_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_upstream_timeout() -> String {
    "60s".to_string()
}

impl ProxySettings {
    pub fn reload_interval(&self) -> CoreResult<Duration> {
        duration_field("proxy.reload_interval", &self.reload_interval)
    }

    pub fn upstream_timeout(&self) -> CoreResult<Duration> {
        duration_field("proxy.upstream_timeout", &self.upstream_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificatePaths {
    pub fullchain: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

/// Route external traffic for `host` + `path_prefix` to `upstreams`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteSpec {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Owning service, used for logging.
    pub service: String,
    /// host:port backends, chosen round-robin.
    pub upstreams: Vec<String>,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn duration_field(field: &str, value: &str) -> CoreResult<Duration> {
    parse_duration(value).ok_or_else(|| CoreError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

impl StackConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Services enabled by the current feature set.
    pub fn active_services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services
            .iter()
            .filter(move |svc| self.features.allows(svc.feature))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.active_services().find(|svc| svc.name == name)
    }

    /// Secrets consumed by `service`.
    pub fn secrets_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a SecretMaterial> {
        self.secrets
            .iter()
            .filter(move |secret| secret.consumers.contains(service))
    }

    /// Ports published for `service` under the current features.
    pub fn published_ports<'a>(&'a self, service: &'a ServiceDescriptor) -> impl Iterator<Item = &'a PortSpec> {
        service
            .ports
            .iter()
            .filter(move |port| self.features.allows(port.feature))
    }

    /// Dependency graph over the active services.
    pub fn dependency_graph(&self) -> CoreResult<DependencyGraph> {
        DependencyGraph::build(self.active_services())
    }

    /// Effective environment of a service: env files in order, then `env`.
    /// Relative env file paths resolve against `base_dir`.
    pub fn service_env(
        &self,
        service: &ServiceDescriptor,
        base_dir: &Path,
    ) -> CoreResult<BTreeMap<String, String>> {
        merge_env(&service.env_files, &service.env, base_dir)
    }

    /// Check every cross-reference and invariant of the stack.
    pub fn validate(&self) -> CoreResult<()> {
        unique("network", self.networks.iter().map(|n| n.name.as_str()))?;
        unique("service", self.services.iter().map(|s| s.name.as_str()))?;
        unique("secret", self.secrets.iter().map(|s| s.name.as_str()))?;
        unique("volume", self.volumes.iter().map(|v| v.name.as_str()))?;

        let networks: BTreeSet<&str> = self.networks.iter().map(|n| n.name.as_str()).collect();
        let volumes: BTreeSet<&str> = self.volumes.iter().map(|v| v.name.as_str()).collect();

        for svc in self.active_services() {
            for net in &svc.networks {
                if !networks.contains(net.as_str()) {
                    return Err(CoreError::UnknownReference {
                        service: svc.name.clone(),
                        kind: "network",
                        name: net.clone(),
                    });
                }
            }
            for vol in &svc.volumes {
                if !volumes.contains(vol.as_str()) {
                    return Err(CoreError::UnknownReference {
                        service: svc.name.clone(),
                        kind: "volume",
                        name: vol.clone(),
                    });
                }
            }
            for dep in &svc.depends_on {
                if let Some(disabled) = self
                    .services
                    .iter()
                    .find(|s| &s.name == dep && !self.features.allows(s.feature))
                {
                    return Err(CoreError::DisabledDependency {
                        service: svc.name.clone(),
                        dependency: dep.clone(),
                        feature: disabled.feature.map(|f| f.to_string()).unwrap_or_default(),
                    });
                }
            }
        }

        let graph = self.dependency_graph()?;

        for svc in self.active_services() {
            for dep in &svc.depends_on {
                if let Some(target) = self.service(dep)
                    && !svc.shares_network_with(target)
                {
                    return Err(CoreError::Unreachable {
                        service: svc.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let all_services: BTreeSet<&str> = self.services.iter().map(|s| s.name.as_str()).collect();
        for secret in &self.secrets {
            SecretSource::parse(&secret.name, &secret.source)?;
            for consumer in &secret.consumers {
                if !all_services.contains(consumer.as_str()) {
                    return Err(CoreError::Invalid(format!(
                        "secret {} is consumed by unknown service {consumer}",
                        secret.name
                    )));
                }
            }
        }

        self.launch.readiness_timeout()?;
        self.launch.poll_interval()?;
        self.launch.probe_timeout()?;
        self.launch.restart_delay()?;

        if let Some(bootstrap) = &self.bootstrap {
            let job = self.service(&bootstrap.service).ok_or_else(|| {
                CoreError::Invalid(format!("bootstrap service {} is not an active service", bootstrap.service))
            })?;
            if !job.is_job() {
                return Err(CoreError::Invalid(format!(
                    "bootstrap service {} must be of kind job",
                    bootstrap.service
                )));
            }
            if !graph.contains(&bootstrap.store) {
                return Err(CoreError::Invalid(format!(
                    "bootstrap store {} is not an active service",
                    bootstrap.store
                )));
            }
            if !job.depends_on.contains(&bootstrap.store) {
                return Err(CoreError::Invalid(format!(
                    "bootstrap service {} must depend on its store {}",
                    bootstrap.service, bootstrap.store
                )));
            }
            bootstrap.lease_ttl()?;
        }

        match (&self.proxy, self.features.https) {
            (None, true) => {
                return Err(CoreError::Invalid(
                    "feature https is enabled but no [proxy] section is configured".to_string(),
                ));
            }
            (Some(proxy), _) => {
                proxy.reload_interval()?;
                proxy.upstream_timeout()?;
                for route in &proxy.routes {
                    if !route.path_prefix.starts_with('/') {
                        return Err(CoreError::Invalid(format!(
                            "route prefix {:?} must start with '/'",
                            route.path_prefix
                        )));
                    }
                    if route.upstreams.is_empty() {
                        return Err(CoreError::Invalid(format!(
                            "route {} for service {} has no upstreams",
                            route.path_prefix, route.service
                        )));
                    }
                }
            }
            (None, false) => {}
        }

        Ok(())
    }
}

/// Merge env files (in order) and an explicit map, the map winning.
pub fn merge_env(
    env_files: &[PathBuf],
    env: &BTreeMap<String, String>,
    base_dir: &Path,
) -> CoreResult<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    for file in env_files {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        };
        merged.extend(EnvFile::load(&path)?.vars());
    }
    merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(merged)
}

fn unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> CoreResult<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(CoreError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
