//! Descriptor types for the services, networks, secrets and volumes that
//! make up a stack.
//!
//! These are the declarative inputs of the launcher. They are read from
//! `stack.toml` (see [`crate::config`]) and never mutated at runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique name of a service within a stack.
pub type ServiceName = String;

// ── Service ────────────────────────────────────────────────────────

/// A single service of the stack, as handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    /// Image reference (opaque to SyncStack, passed to the runner).
    pub image: String,
    /// Networks this service is attached to.
    #[serde(default)]
    pub networks: BTreeSet<String>,
    /// Services that must be ready before this one starts.
    #[serde(default)]
    pub depends_on: BTreeSet<ServiceName>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default)]
    pub kind: ServiceKind,
    /// How to decide that a daemon is ready. Daemons without a probe are
    /// ready as soon as they have been started.
    #[serde(default)]
    pub readiness: Option<ReadinessProbe>,
    /// argv used by the process runner.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment passed through unmodified.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Env files merged under `env` (later files win, `env` wins over files).
    #[serde(default)]
    pub env_files: Vec<PathBuf>,
    /// Keys that must resolve to a non-empty value before start.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Named volumes mounted by this service.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Published ports. Ports tied to a feature are only published when
    /// that feature is enabled.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// Node the service is pinned to, if any.
    #[serde(default)]
    pub placement: Option<String>,
    /// The service only exists when this feature is enabled.
    #[serde(default)]
    pub feature: Option<Feature>,
}

fn default_replicas() -> u32 {
    1
}

impl ServiceDescriptor {
    pub fn is_job(&self) -> bool {
        self.kind == ServiceKind::Job
    }

    /// Whether this service and `other` share at least one network.
    pub fn shares_network_with(&self, other: &ServiceDescriptor) -> bool {
        self.networks.intersection(&other.networks).next().is_some()
    }
}

/// What the orchestrator does when a service's process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    #[default]
    OnFailure,
    None,
}

impl RestartPolicy {
    /// Whether a process that exited with the given success flag is restarted.
    pub fn should_restart(self, exited_successfully: bool) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => !exited_successfully,
            RestartPolicy::None => false,
        }
    }
}

/// Long-running daemon or run-to-completion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Daemon,
    /// Ready once it has exited successfully.
    Job,
}

/// Readiness probe for a daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Ready when a TCP connection to `address` succeeds.
    Tcp { address: String },
    /// Ready when `GET http://{address}{path}` answers 2xx.
    Http { address: String, path: String },
}

impl ReadinessProbe {
    pub fn address(&self) -> &str {
        match self {
            ReadinessProbe::Tcp { address } | ReadinessProbe::Http { address, .. } => address,
        }
    }
}

/// A published port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortSpec {
    pub published: u16,
    pub target: u16,
    #[serde(default)]
    pub feature: Option<Feature>,
}

// ── Features ──────────────────────────────────────────────────────

/// Optional parts of the stack that can be toggled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// TLS terminator on 443 and redirect of plain HTTP.
    Https,
    /// Web admin UI for the directory service.
    LdapAdminUi,
    /// Publish the relational store port on the host.
    ExposeStorePort,
    /// Publish the directory service port on the host.
    ExposeDirectoryPort,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Feature::Https => "https",
            Feature::LdapAdminUi => "ldap_admin_ui",
            Feature::ExposeStorePort => "expose_store_port",
            Feature::ExposeDirectoryPort => "expose_directory_port",
        };
        f.write_str(name)
    }
}

/// Feature toggles for a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackFeatures {
    #[serde(default = "enabled")]
    pub https: bool,
    #[serde(default)]
    pub ldap_admin_ui: bool,
    #[serde(default)]
    pub expose_store_port: bool,
    #[serde(default)]
    pub expose_directory_port: bool,
}

fn enabled() -> bool {
    true
}

impl Default for StackFeatures {
    fn default() -> Self {
        Self {
            https: true,
            ldap_admin_ui: false,
            expose_store_port: false,
            expose_directory_port: false,
        }
    }
}

impl StackFeatures {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Https => self.https,
            Feature::LdapAdminUi => self.ldap_admin_ui,
            Feature::ExposeStorePort => self.expose_store_port,
            Feature::ExposeDirectoryPort => self.expose_directory_port,
        }
    }

    /// `None` (no feature) is always enabled.
    pub fn allows(&self, feature: Option<Feature>) -> bool {
        feature.is_none_or(|f| self.is_enabled(f))
    }
}

// ── Network ───────────────────────────────────────────────────────

/// An overlay network. Services only talk to services on a shared segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSegment {
    pub name: String,
    /// Internal-only (no external route).
    #[serde(default)]
    pub internal: bool,
    /// Traffic on this segment is encrypted.
    #[serde(default)]
    pub encrypted: bool,
}

// ── Secret ────────────────────────────────────────────────────────

/// Credential material mounted into its consumers before they start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretMaterial {
    pub name: String,
    /// `file:///path`, a plain path, `https://…` or `unix://…`.
    pub source: String,
    /// Read-only path inside the consumer where the secret appears.
    pub mount_path: PathBuf,
    #[serde(default)]
    pub consumers: BTreeSet<ServiceName>,
}

// ── Volume ────────────────────────────────────────────────────────

/// A named volume. Persistent volumes survive restarts and redeploys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default = "enabled")]
    pub persistent: bool,
}
