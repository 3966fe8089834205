//! Readiness probe logic.
//!
//! A service is ready when it accepts connections on its declared port
//! (TCP probe) or answers its HTTP readiness path with 2xx. Probes are
//! retried at a fixed interval until a deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use syncstack_core::ReadinessProbe;

use crate::error::{ReadinessError, ReadinessResult};

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// TCP connect succeeded / HTTP returned 2xx.
    Ready,
    /// The endpoint answered but is not ready (HTTP non-2xx).
    NotReady,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

/// Boxed future returned by a custom probe.
pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeResult> + Send>>;

/// Custom probe used by embedders and tests.
pub type ProbeFn = Arc<dyn Fn() -> ProbeFuture + Send + Sync>;

/// A runnable readiness probe.
#[derive(Clone)]
pub enum Probe {
    Tcp { address: String, timeout: Duration },
    Http { address: String, path: String, timeout: Duration },
    Custom { name: String, check: ProbeFn },
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Probe::Tcp { address, .. } => write!(f, "tcp://{address}"),
            Probe::Http { address, path, .. } => write!(f, "http://{address}{path}"),
            Probe::Custom { name, .. } => write!(f, "custom:{name}"),
        }
    }
}

impl Probe {
    /// Build a probe from a service's declared readiness check.
    pub fn from_config(config: &ReadinessProbe, timeout: Duration) -> Self {
        match config {
            ReadinessProbe::Tcp { address } => Probe::Tcp {
                address: address.clone(),
                timeout,
            },
            ReadinessProbe::Http { address, path } => Probe::Http {
                address: address.clone(),
                path: path.clone(),
                timeout,
            },
        }
    }

    pub fn custom<F, Fut>(name: &str, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        Probe::Custom {
            name: name.to_string(),
            check: Arc::new(move || -> ProbeFuture { Box::pin(check()) }),
        }
    }

    /// Run the probe once.
    pub async fn check(&self) -> ProbeResult {
        match self {
            Probe::Tcp { address, timeout } => tcp_probe(address, *timeout).await,
            Probe::Http {
                address,
                path,
                timeout,
            } => http_probe(address, path, *timeout).await,
            Probe::Custom { check, .. } => check().await,
        }
    }
}

/// Tracks consecutive probe results for one target.
#[derive(Debug)]
pub struct ReadinessTracker {
    ready: bool,
    attempts: u32,
    consecutive_successes: u32,
    consecutive_failures: u32,
    /// Successes in a row required before the target counts as ready.
    ready_threshold: u32,
}

impl ReadinessTracker {
    pub fn new(ready_threshold: u32) -> Self {
        Self {
            ready: false,
            attempts: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            ready_threshold: ready_threshold.max(1),
        }
    }

    /// Record a probe result and return whether the target is now ready.
    pub fn record(&mut self, result: ProbeResult) -> bool {
        self.attempts += 1;
        match result {
            ProbeResult::Ready => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.ready_threshold {
                    self.ready = true;
                }
            }
            ProbeResult::NotReady | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                self.ready = false;
            }
        }
        self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Poll `probe` every `poll_interval` until it reports ready or `timeout`
/// elapses. Returns the number of probes it took.
pub async fn wait_ready(
    probe: &Probe,
    poll_interval: Duration,
    timeout: Duration,
) -> ReadinessResult<u32> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut tracker = ReadinessTracker::new(1);

    loop {
        if tracker.record(probe.check().await) {
            info!(probe = ?probe, attempts = tracker.attempts(), "target ready");
            return Ok(tracker.attempts());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReadinessError::Timeout {
                target: format!("{probe:?}"),
                waited: now - started,
                attempts: tracker.attempts(),
            });
        }

        debug!(
            probe = ?probe,
            failures = tracker.consecutive_failures(),
            "target not ready yet"
        );
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Check that `address` accepts TCP connections.
pub async fn tcp_probe(address: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
        Ok(Ok(_)) => ProbeResult::Ready,
        Ok(Err(e)) => {
            debug!(error = %e, %address, "tcp probe connection failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%address, "tcp probe timed out");
            ProbeResult::Failed
        }
    }
}

/// Perform an HTTP readiness probe against an endpoint.
///
/// Returns `Ready` if the response is 2xx, `NotReady` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "http probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "http probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "syncstack-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "http probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeResult::Ready
                } else {
                    debug!(status = %resp.status(), %uri, "http probe non-2xx");
                    ProbeResult::NotReady
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "http probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "http probe timed out");
            ProbeResult::Failed
        }
    }
}
