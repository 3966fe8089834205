//! TLS terminator: both listeners plus the certificate reloader.

use std::net::SocketAddr;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use syncstack_core::config::ProxySettings;
use syncstack_state::StateStore;

use crate::error::ProxyResult;
use crate::reloader::{CertificateReloader, ReloadHandle};
use crate::server::{HttpsServer, RedirectServer, ReverseProxy, bind};
use crate::tls::server_config;

/// Name under which certificate status is recorded.
pub const CERTIFICATE_NAME: &str = "proxy";

pub struct TlsTerminator {
    settings: ProxySettings,
    state: Option<StateStore>,
}

impl TlsTerminator {
    pub fn new(settings: ProxySettings) -> Self {
        Self {
            settings,
            state: None,
        }
    }

    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Load the initial certificate, bind both ports and start serving.
    ///
    /// Fails without serving anything if the certificate cannot be loaded or
    /// either port cannot be bound.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> ProxyResult<RunningTerminator> {
        let settings = self.settings;
        let reload_interval = settings.reload_interval()?;

        let mut reloader =
            CertificateReloader::initial(CERTIFICATE_NAME, settings.certificate.clone())?;
        if let Some(state) = self.state {
            reloader = reloader.with_state(state);
        }
        let tls_config = server_config(reloader.resolver(), settings.min_tls_version)?;
        let proxy = ReverseProxy::from_settings(&settings)?;

        let http_listener = bind(&settings.http_listen).await?;
        let https_listener = bind(&settings.https_listen).await?;
        let http_addr = http_listener.local_addr()?;
        let https_addr = https_listener.local_addr()?;

        let mut tasks = JoinSet::new();
        let redirect = RedirectServer::new(&settings);
        tasks.spawn(redirect.serve(http_listener, shutdown.clone()));
        let https = HttpsServer::new(TlsAcceptor::from(tls_config), proxy);
        tasks.spawn(https.serve(https_listener, shutdown.clone()));

        let (reload, reloader_task) = reloader.spawn(reload_interval, shutdown);
        tasks.spawn(async move {
            if let Err(e) = reloader_task.await {
                error!(error = %e, "certificate reloader panicked");
            }
            Ok(())
        });

        info!(%http_addr, %https_addr, "tls terminator started");
        Ok(RunningTerminator {
            http_addr,
            https_addr,
            reload,
            tasks,
        })
    }
}

pub struct RunningTerminator {
    pub http_addr: SocketAddr,
    pub https_addr: SocketAddr,
    reload: ReloadHandle,
    tasks: JoinSet<ProxyResult<()>>,
}

impl RunningTerminator {
    pub fn reload_handle(&self) -> ReloadHandle {
        self.reload.clone()
    }

    /// Wait for both servers and the reloader to stop.
    pub async fn wait(mut self) -> ProxyResult<()> {
        let mut result = Ok(());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "proxy task failed");
                    result = Err(e);
                }
                Err(e) => error!(error = %e, "proxy task panicked"),
            }
        }
        result
    }
}
