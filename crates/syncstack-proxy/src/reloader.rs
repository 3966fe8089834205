//! Periodic certificate reload.
//!
//! The reloader re-reads the bundle from disk on a fixed interval or when
//! [`ReloadHandle::trigger`] is called. A bundle that fails to load never
//! replaces the active one; the failure is logged, recorded in the ledger
//! and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use syncstack_core::config::CertificatePaths;
use syncstack_state::{CertificateStatus, StateStore, epoch_secs};

use crate::error::{ProxyError, ProxyResult};
use crate::tls::{CertificateBundle, ReloadingResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Installed { fingerprint: String },
    /// Same leaf certificate as the active bundle.
    Unchanged,
}

/// Requests an immediate reload from a running reloader.
#[derive(Clone, Debug)]
pub struct ReloadHandle {
    notify: Arc<Notify>,
}

impl ReloadHandle {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

pub struct CertificateReloader {
    name: String,
    paths: CertificatePaths,
    resolver: Arc<ReloadingResolver>,
    state: Option<StateStore>,
}

impl CertificateReloader {
    /// Load the initial bundle. Startup fails if there is none to serve.
    pub fn initial(name: &str, paths: CertificatePaths) -> ProxyResult<Self> {
        let bundle = CertificateBundle::load(&paths)?;
        info!(%name, fingerprint = %bundle.fingerprint, "initial certificate loaded");
        Ok(Self {
            name: name.to_string(),
            paths,
            resolver: Arc::new(ReloadingResolver::new(bundle)),
            state: None,
        })
    }

    /// Record reload results in the ledger, starting with the active bundle.
    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        let current = self.resolver.current();
        self.record(Some(&current), None);
        self
    }

    pub fn resolver(&self) -> Arc<ReloadingResolver> {
        self.resolver.clone()
    }

    /// Re-read the bundle once. File reads run on the blocking pool.
    pub async fn reload(&self) -> ProxyResult<ReloadOutcome> {
        let paths = self.paths.clone();
        let loaded = tokio::task::spawn_blocking(move || CertificateBundle::load(&paths))
            .await
            .unwrap_or_else(|e| Err(ProxyError::reload(&self.paths.fullchain, e.to_string())));

        let bundle = match loaded {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    name = %self.name,
                    error = %e,
                    active = %self.resolver.current().fingerprint,
                    "certificate reload failed, keeping active certificate"
                );
                self.record(None, Some(e.to_string()));
                return Err(e);
            }
        };

        if bundle.fingerprint == self.resolver.current().fingerprint {
            debug!(name = %self.name, "certificate unchanged");
            self.record(None, None);
            return Ok(ReloadOutcome::Unchanged);
        }

        let fingerprint = bundle.fingerprint.clone();
        self.record(Some(&bundle), None);
        self.resolver.install(bundle);
        Ok(ReloadOutcome::Installed { fingerprint })
    }

    fn record(&self, installed: Option<&CertificateBundle>, error: Option<String>) {
        let Some(state) = &self.state else {
            return;
        };
        let mut status = match state.get_certificate_status(&self.name) {
            Ok(Some(status)) => status,
            _ => CertificateStatus {
                name: self.name.clone(),
                ..CertificateStatus::default()
            },
        };
        let now = epoch_secs();
        if let Some(bundle) = installed {
            status.fingerprint = Some(bundle.fingerprint.clone());
            status.issued_at = bundle.not_before;
            status.expires_at = bundle.not_after;
            status.loaded_at = Some(now);
        }
        status.last_error = error;
        status.checked_at = now;
        if let Err(e) = state.put_certificate_status(&status) {
            warn!(name = %self.name, error = %e, "failed to record certificate status");
        }
    }

    /// Run the reload loop until `shutdown` flips to `true`.
    pub fn spawn(
        self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> (ReloadHandle, JoinHandle<()>) {
        let notify = Arc::new(Notify::new());
        let handle = ReloadHandle {
            notify: notify.clone(),
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(name = %self.name, ?interval, "certificate reloader started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = notify.notified() => debug!(name = %self.name, "reload requested"),
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = self.reload().await {
                    debug!(name = %self.name, error = %e, "retrying on next tick");
                }
            }
            info!(name = %self.name, "certificate reloader stopped");
        });

        (handle, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::generate_self_signed;

    fn write(paths: &CertificatePaths, domain: &str) {
        let pair = generate_self_signed(domain).unwrap();
        std::fs::write(&paths.fullchain, pair.cert_pem).unwrap();
        std::fs::write(&paths.private_key, pair.key_pem).unwrap();
    }

    fn setup() -> (tempfile::TempDir, CertificatePaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertificatePaths {
            fullchain: dir.path().join("fullchain.pem"),
            private_key: dir.path().join("privkey.pem"),
        };
        write(&paths, "sync.example.org");
        (dir, paths)
    }

    #[tokio::test]
    async fn unchanged_bundle_is_not_reinstalled() {
        let (_dir, paths) = setup();
        let reloader = CertificateReloader::initial("proxy", paths).unwrap();
        assert_eq!(reloader.reload().await.unwrap(), ReloadOutcome::Unchanged);
    }

    #[tokio::test]
    async fn new_bundle_is_installed_and_recorded() {
        let (_dir, paths) = setup();
        let state = StateStore::open_in_memory().unwrap();
        let reloader = CertificateReloader::initial("proxy", paths.clone())
            .unwrap()
            .with_state(state.clone());
        let before = reloader.resolver().current().fingerprint.clone();

        write(&paths, "sync.example.org");
        let outcome = reloader.reload().await.unwrap();

        let after = reloader.resolver().current().fingerprint.clone();
        assert_ne!(before, after);
        assert_eq!(outcome, ReloadOutcome::Installed { fingerprint: after.clone() });
        let status = state.get_certificate_status("proxy").unwrap().unwrap();
        assert_eq!(status.fingerprint, Some(after));
        assert!(status.expires_at.is_some());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn broken_bundle_keeps_last_known_good() {
        let (_dir, paths) = setup();
        let state = StateStore::open_in_memory().unwrap();
        let reloader = CertificateReloader::initial("proxy", paths.clone())
            .unwrap()
            .with_state(state.clone());
        let good = reloader.resolver().current().fingerprint.clone();

        std::fs::write(&paths.fullchain, "").unwrap();
        assert!(matches!(
            reloader.reload().await,
            Err(ProxyError::CertificateReloadFailed { .. })
        ));
        write(&paths, "sync.example.org");
        std::fs::remove_file(&paths.private_key).unwrap();
        assert!(reloader.reload().await.is_err());

        assert_eq!(reloader.resolver().current().fingerprint, good);
        let status = state.get_certificate_status("proxy").unwrap().unwrap();
        assert_eq!(status.fingerprint, Some(good));
        assert!(status.last_error.unwrap().contains("privkey.pem"));
    }

    #[tokio::test]
    async fn chain_renewed_before_its_key_is_not_installed() {
        let (_dir, paths) = setup();
        let state = StateStore::open_in_memory().unwrap();
        let reloader = CertificateReloader::initial("proxy", paths.clone())
            .unwrap()
            .with_state(state.clone());
        let good = reloader.resolver().current().fingerprint.clone();

        let renewed = generate_self_signed("sync.example.org").unwrap();
        std::fs::write(&paths.fullchain, &renewed.cert_pem).unwrap();
        assert!(matches!(
            reloader.reload().await,
            Err(ProxyError::CertificateReloadFailed { .. })
        ));
        assert_eq!(reloader.resolver().current().fingerprint, good);
        let status = state.get_certificate_status("proxy").unwrap().unwrap();
        assert!(status.last_error.is_some());

        // Once the key lands too, the renewed bundle goes live.
        std::fs::write(&paths.private_key, &renewed.key_pem).unwrap();
        assert!(matches!(
            reloader.reload().await.unwrap(),
            ReloadOutcome::Installed { .. }
        ));
        assert_ne!(reloader.resolver().current().fingerprint, good);
    }

    #[test]
    fn startup_without_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertificatePaths {
            fullchain: dir.path().join("fullchain.pem"),
            private_key: dir.path().join("privkey.pem"),
        };
        assert!(CertificateReloader::initial("proxy", paths).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reloads_on_interval_and_on_trigger() {
        let (_dir, paths) = setup();
        let reloader = CertificateReloader::initial("proxy", paths.clone()).unwrap();
        let resolver = reloader.resolver();
        let (tx, rx) = watch::channel(false);
        let (handle, task) = reloader.spawn(Duration::from_secs(12 * 3600), rx);

        // Interval tick.
        let first = resolver.current().fingerprint.clone();
        write(&paths, "sync.example.org");
        tokio::time::sleep(Duration::from_secs(12 * 3600 + 1)).await;
        let second = resolver.current().fingerprint.clone();
        assert_ne!(first, second);

        // Explicit trigger, long before the next tick.
        write(&paths, "sync.example.org");
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_ne!(resolver.current().fingerprint, second);

        tx.send_replace(true);
        task.await.unwrap();
    }
}
