//! Listeners for the plaintext and TLS ports.
//!
//! Both servers take an already bound [`TcpListener`], spawn one task per
//! connection and stop accepting once the shutdown signal flips. Connections
//! that are already open run to completion.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use syncstack_core::config::ProxySettings;

use crate::error::{ProxyError, ProxyResult};
use crate::redirect::{ChallengeStore, PlainAction, plain_action, strip_port};
use crate::route::{Router, Upstream};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub async fn bind(addr: &str) -> ProxyResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| ProxyError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut resp = Response::new(full(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .map(|h| strip_port(h).to_string())
        .filter(|h| !h.is_empty())
}

/// Accept connections until shutdown, handing each one to `on_connection`.
async fn accept_loop<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    on_connection: F,
) -> ProxyResult<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(server = name, %addr, "listening");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(on_connection(stream, peer));
                }
                Err(e) => warn!(server = name, error = %e, "accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(server = name, %addr, "shutting down");
    Ok(())
}

/// Plaintext server: redirects to HTTPS and serves ACME challenges.
#[derive(Debug, Clone)]
pub struct RedirectServer {
    fallback_host: Option<String>,
    challenges: ChallengeStore,
}

impl RedirectServer {
    pub fn new(settings: &ProxySettings) -> Self {
        Self {
            fallback_host: settings.public_host.clone(),
            challenges: ChallengeStore::new(&settings.acme_webroot),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody> {
        let host = request_host(&req);
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let action = plain_action(host.as_deref(), path_and_query, self.fallback_host.as_deref());
        drop(req);

        match action {
            PlainAction::Redirect(location) => match HeaderValue::from_str(&location) {
                Ok(value) => {
                    let mut resp = text(StatusCode::MOVED_PERMANENTLY, "");
                    resp.headers_mut().insert(header::LOCATION, value);
                    resp
                }
                Err(_) => text(StatusCode::BAD_REQUEST, "invalid host\n"),
            },
            PlainAction::Challenge(token) => match self.challenges.read(&token).await {
                Some(content) => text(StatusCode::OK, content),
                None => text(StatusCode::NOT_FOUND, "not found\n"),
            },
            PlainAction::NotFound => text(StatusCode::NOT_FOUND, "not found\n"),
            PlainAction::BadRequest => text(StatusCode::BAD_REQUEST, "missing host\n"),
        }
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> ProxyResult<()> {
        let server = Arc::new(self);
        accept_loop("http", listener, shutdown, move |stream, peer| {
            let server = server.clone();
            async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await
                {
                    debug!(%peer, error = %e, "plaintext connection error");
                }
            }
        })
        .await
    }
}

/// Forwards decrypted requests to the routed upstream.
pub struct ReverseProxy {
    router: Router,
    max_body_bytes: u64,
    upstream_timeout: Duration,
}

impl ReverseProxy {
    pub fn new(router: Router, max_body_bytes: u64, upstream_timeout: Duration) -> Self {
        Self {
            router,
            max_body_bytes,
            upstream_timeout,
        }
    }

    pub fn from_settings(settings: &ProxySettings) -> ProxyResult<Self> {
        Ok(Self::new(
            Router::new(&settings.routes),
            settings.max_body_bytes,
            settings.upstream_timeout()?,
        ))
    }

    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_body_bytes) {
            return text(StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n");
        }

        let host = request_host(&req);
        let Some(upstream) = self.router.route(host.as_deref(), req.uri().path()) else {
            debug!(?host, path = %req.uri().path(), "no route");
            return text(StatusCode::NOT_FOUND, "no route\n");
        };

        let (mut parts, body) = req.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        add_forwarded(&mut parts.headers, host.as_deref(), peer);
        let limit = usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX);
        let req = Request::from_parts(parts, Limited::new(body, limit));

        match self.send(&upstream, req).await {
            Ok(resp) => {
                let (mut parts, body) = resp.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, body.boxed())
            }
            Err(e) => {
                warn!(service = %upstream.service, error = %e, "upstream request failed");
                text(StatusCode::BAD_GATEWAY, "bad gateway\n")
            }
        }
    }

    async fn send<B>(&self, upstream: &Upstream, req: Request<B>) -> ProxyResult<Response<Incoming>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let fail = |reason: String| ProxyError::Upstream {
            upstream: upstream.address.clone(),
            reason,
        };

        let exchange = async {
            let stream = TcpStream::connect(&upstream.address)
                .await
                .map_err(|e| fail(format!("connect: {e}")))?;
            let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| fail(format!("handshake: {e}")))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "upstream connection closed");
                }
            });
            sender
                .send_request(req)
                .await
                .map_err(|e| fail(format!("request: {e}")))
        };

        match tokio::time::timeout(self.upstream_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(fail(format!("no response within {:?}", self.upstream_timeout))),
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded(headers: &mut HeaderMap, host: Option<&str>, peer: SocketAddr) {
    let client = peer.ip().to_string();
    let forwarded_for = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) => format!("{prior}, {client}"),
        None => client,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    if let Some(value) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert("x-forwarded-host", value);
    }
}

/// TLS server: terminates TLS and hands requests to the [`ReverseProxy`].
pub struct HttpsServer {
    acceptor: TlsAcceptor,
    proxy: Arc<ReverseProxy>,
    handshake_timeout: Duration,
}

impl HttpsServer {
    pub fn new(acceptor: TlsAcceptor, proxy: ReverseProxy) -> Self {
        Self {
            acceptor,
            proxy: Arc::new(proxy),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> ProxyResult<()> {
        let Self {
            acceptor,
            proxy,
            handshake_timeout,
        } = self;

        accept_loop("https", listener, shutdown, move |stream, peer| {
            let acceptor = acceptor.clone();
            let proxy = proxy.clone();
            async move {
                let tls = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls)) => tls,
                    Ok(Err(e)) => {
                        debug!(%peer, error = %e, "tls handshake failed");
                        return;
                    }
                    Err(_) => {
                        debug!(%peer, "tls handshake timed out");
                        return;
                    }
                };

                let svc = service_fn(move |req: Request<Incoming>| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, Infallible>(proxy.handle(req, peer).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), svc)
                    .await
                {
                    debug!(%peer, error = %e, "tls connection error");
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncstack_core::config::RouteSpec;

    fn peer() -> SocketAddr {
        "203.0.113.7:50000".parse().unwrap()
    }

    fn proxy(routes: Vec<RouteSpec>, max_body_bytes: u64) -> ReverseProxy {
        ReverseProxy::new(Router::new(&routes), max_body_bytes, Duration::from_millis(500))
    }

    fn route(prefix: &str, upstream: &str) -> RouteSpec {
        RouteSpec {
            host: None,
            path_prefix: prefix.to_string(),
            service: "sync".to_string(),
            upstreams: vec![upstream.to_string()],
        }
    }

    fn settings(webroot: &std::path::Path) -> ProxySettings {
        toml::from_str(&format!(
            r#"
            public_host = "sync.example.org"
            acme_webroot = "{}"
            [certificate]
            fullchain = "/unused/fullchain.pem"
            private_key = "/unused/privkey.pem"
            "#,
            webroot.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn plaintext_redirects_with_location() {
        let dir = tempfile::tempdir().unwrap();
        let server = RedirectServer::new(&settings(dir.path()));
        let req = Request::builder()
            .uri("/odktables/x?y=1")
            .header("host", "sync.example.org:80")
            .body(())
            .unwrap();

        let resp = server.handle(req).await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "https://sync.example.org/odktables/x?y=1"
        );
    }

    #[tokio::test]
    async fn plaintext_without_host_uses_public_host() {
        let dir = tempfile::tempdir().unwrap();
        let server = RedirectServer::new(&settings(dir.path()));
        let req = Request::builder().uri("/").body(()).unwrap();
        let resp = server.handle(req).await;
        assert_eq!(resp.headers()[header::LOCATION], "https://sync.example.org/");
    }

    #[tokio::test]
    async fn plaintext_serves_challenges() {
        let dir = tempfile::tempdir().unwrap();
        let challenges = dir.path().join(".well-known/acme-challenge");
        std::fs::create_dir_all(&challenges).unwrap();
        std::fs::write(challenges.join("tok"), "tok.key").unwrap();
        let server = RedirectServer::new(&settings(dir.path()));

        let req = Request::builder()
            .uri("/.well-known/acme-challenge/tok")
            .header("host", "sync.example.org")
            .body(())
            .unwrap();
        let resp = server.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("tok.key"));

        let req = Request::builder()
            .uri("/.well-known/acme-challenge/missing")
            .header("host", "sync.example.org")
            .body(())
            .unwrap();
        assert_eq!(server.handle(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_routing() {
        let proxy = proxy(vec![route("/", "127.0.0.1:1")], 4);
        let req = Request::builder()
            .uri("/upload")
            .header("host", "sync.example.org")
            .header("content-length", "5")
            .body(Full::new(Bytes::from("12345")))
            .unwrap();
        assert_eq!(proxy.handle(req, peer()).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unrouted_path_is_not_found() {
        let proxy = proxy(vec![route("/odktables", "127.0.0.1:1")], 1024);
        let req = Request::builder()
            .uri("/elsewhere")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(proxy.handle(req, peer()).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let proxy = proxy(vec![route("/", "127.0.0.1:1")], 1024);
        let req = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(proxy.handle(req, peer()).await.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn forwarded_headers_append_client() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        add_forwarded(&mut headers, Some("sync.example.org"), peer());

        assert_eq!(headers["x-forwarded-for"], "198.51.100.1, 203.0.113.7");
        assert_eq!(headers["x-forwarded-proto"], "https");
        assert_eq!(headers["x-forwarded-host"], "sync.example.org");
    }
}
