//! End-to-end tests over real sockets: plaintext redirect, ACME challenge,
//! proxying over TLS and certificate reload without dropping connections.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use sha2::{Digest, Sha256};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use syncstack_core::config::ProxySettings;
use syncstack_proxy::{CERTIFICATE_NAME, TlsTerminator, generate_self_signed};
use syncstack_state::StateStore;

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

fn write_bundle(dir: &Path) {
    let pair = generate_self_signed("sync.example.org").unwrap();
    std::fs::write(dir.join("fullchain.pem"), pair.cert_pem).unwrap();
    std::fs::write(dir.join("privkey.pem"), pair.key_pem).unwrap();
}

fn settings(dir: &Path, upstream: SocketAddr) -> ProxySettings {
    toml::from_str(&format!(
        r#"
        http_listen = "127.0.0.1:0"
        https_listen = "127.0.0.1:0"
        public_host = "sync.example.org"
        acme_webroot = "{root}/webroot"
        reload_interval = "1h"
        upstream_timeout = "2s"

        [certificate]
        fullchain = "{root}/fullchain.pem"
        private_key = "{root}/privkey.pem"

        [[route]]
        path_prefix = "/odktables"
        service = "sync"
        upstreams = ["{upstream}"]
        "#,
        root = dir.display(),
    ))
    .unwrap()
}

/// Upstream that echoes the forwarded headers it received.
async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let svc = service_fn(|req: Request<Incoming>| async move {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-")
                            .to_string()
                    };
                    let body = format!(
                        "{} proto={} host={}",
                        req.uri().path(),
                        header("x-forwarded-proto"),
                        header("x-forwarded-host"),
                    );
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    addr
}

async fn tls_connect(addr: SocketAddr) -> TlsStream<TcpStream> {
    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .unwrap()
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
    .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("sync.example.org".to_string()).unwrap();
    connector.connect(name, tcp).await.unwrap()
}

fn served_fingerprint(stream: &TlsStream<TcpStream>) -> String {
    let (_, conn) = stream.get_ref();
    let leaf = &conn.peer_certificates().unwrap()[0];
    hex::encode(Sha256::digest(leaf.as_ref()))
}

fn file_fingerprint(dir: &Path) -> String {
    let pem = std::fs::read(dir.join("fullchain.pem")).unwrap();
    let leaf = rustls_pemfile::certs(&mut pem.as_slice()).next().unwrap().unwrap();
    hex::encode(Sha256::digest(leaf.as_ref()))
}

type Sender = hyper::client::conn::http1::SendRequest<Empty<Bytes>>;

async fn http_client<S>(io: S) -> Sender
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .unwrap();
    tokio::spawn(conn);
    sender
}

async fn get(sender: &mut Sender, path: &str) -> (u16, Option<String>, String) {
    let req = Request::builder()
        .uri(path)
        .header("host", "sync.example.org")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status().as_u16();
    let location = resp
        .headers()
        .get("location")
        .map(|v| v.to_str().unwrap().to_string());
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, location, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn plaintext_port_redirects_except_challenges() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path());
    let challenges = dir.path().join("webroot/.well-known/acme-challenge");
    std::fs::create_dir_all(&challenges).unwrap();
    std::fs::write(challenges.join("token-1"), "token-1.thumbprint").unwrap();

    let upstream = spawn_upstream().await;
    let (tx, rx) = watch::channel(false);
    let running = TlsTerminator::new(settings(dir.path(), upstream))
        .start(rx)
        .await
        .unwrap();

    let stream = TcpStream::connect(running.http_addr).await.unwrap();
    let mut sender = http_client(stream).await;

    let (status, location, _) = get(&mut sender, "/odktables/default?x=1").await;
    assert_eq!(status, 301);
    assert_eq!(
        location.as_deref(),
        Some("https://sync.example.org/odktables/default?x=1")
    );

    let (status, location, body) = get(&mut sender, "/.well-known/acme-challenge/token-1").await;
    assert_eq!(status, 200);
    assert!(location.is_none());
    assert_eq!(body, "token-1.thumbprint");

    let (status, _, _) = get(&mut sender, "/.well-known/acme-challenge/unknown").await;
    assert_eq!(status, 404);

    tx.send_replace(true);
    running.wait().await.unwrap();
}

#[tokio::test]
async fn proxies_over_tls_and_reloads_without_dropping_connections() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path());
    let first = file_fingerprint(dir.path());

    let state = StateStore::open_in_memory().unwrap();
    let upstream = spawn_upstream().await;
    let (tx, rx) = watch::channel(false);
    let running = TlsTerminator::new(settings(dir.path(), upstream))
        .with_state(state.clone())
        .start(rx)
        .await
        .unwrap();

    // An established connection on the original certificate.
    let old = tls_connect(running.https_addr).await;
    assert_eq!(served_fingerprint(&old), first);
    let mut old_sender = http_client(old).await;
    let (status, _, body) = get(&mut old_sender, "/odktables/default/tables").await;
    assert_eq!(status, 200);
    assert_eq!(body, "/odktables/default/tables proto=https host=sync.example.org");

    let (status, _, _) = get(&mut old_sender, "/unrouted").await;
    assert_eq!(status, 404);

    // Renew on disk and ask for a reload.
    write_bundle(dir.path());
    let second = file_fingerprint(dir.path());
    assert_ne!(first, second);
    running.reload_handle().trigger();

    let mut renewed = false;
    for _ in 0..100 {
        let fresh = tls_connect(running.https_addr).await;
        if served_fingerprint(&fresh) == second {
            renewed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(renewed, "new handshakes never saw the renewed certificate");

    // The old connection keeps working.
    let (status, _, _) = get(&mut old_sender, "/odktables/default/tables").await;
    assert_eq!(status, 200);

    // A broken renewal keeps serving the last good certificate.
    std::fs::write(dir.path().join("fullchain.pem"), "garbage").unwrap();
    running.reload_handle().trigger();
    let mut recorded = false;
    for _ in 0..100 {
        let status = state.get_certificate_status(CERTIFICATE_NAME).unwrap().unwrap();
        if status.last_error.is_some() {
            recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(recorded, "reload failure was not recorded");
    let fresh = tls_connect(running.https_addr).await;
    assert_eq!(served_fingerprint(&fresh), second);

    let status = state.get_certificate_status(CERTIFICATE_NAME).unwrap().unwrap();
    assert_eq!(status.fingerprint, Some(second));

    tx.send_replace(true);
    running.wait().await.unwrap();
}

#[tokio::test]
async fn refuses_to_start_without_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let (_tx, rx) = watch::channel(false);
    let result = TlsTerminator::new(settings(dir.path(), "127.0.0.1:1".parse().unwrap()))
        .start(rx)
        .await;
    assert!(result.is_err());
}
