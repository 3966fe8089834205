//! TLS termination with a swappable certificate.
//!
//! rustls asks the [`ReloadingResolver`] for a certificate during every
//! handshake. Installing a new bundle therefore only affects handshakes that
//! start afterwards; established connections keep the keys they negotiated.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, RwLock};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use syncstack_core::config::{CertificatePaths, TlsVersion};

use crate::error::{ProxyError, ProxyResult};

/// A parsed full chain and private key.
#[derive(Clone)]
pub struct CertificateBundle {
    pub key: Arc<CertifiedKey>,
    /// SHA-256 of the leaf certificate (hex).
    pub fingerprint: String,
    /// Validity window of the leaf, unix seconds, when it could be parsed.
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("fingerprint", &self.fingerprint)
            .field("chain_len", &self.key.cert.len())
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl CertificateBundle {
    /// Read and parse the bundle at `paths`.
    pub fn load(paths: &CertificatePaths) -> ProxyResult<Self> {
        let chain = read_chain(&paths.fullchain)?;
        let key_der = {
            let file = File::open(&paths.private_key)
                .map_err(|e| ProxyError::reload(&paths.private_key, e.to_string()))?;
            rustls_pemfile::private_key(&mut BufReader::new(file))
                .map_err(|e| ProxyError::reload(&paths.private_key, e.to_string()))?
                .ok_or_else(|| ProxyError::reload(&paths.private_key, "no private key found"))?
        };
        let leaf = chain[0].clone();
        let fingerprint = hex::encode(Sha256::digest(leaf.as_ref()));
        let (not_before, not_after) = validity(&leaf);
        let chain_len = chain.len();

        // Rejects a key that does not belong to the leaf, e.g. a chain
        // renewed on disk before its key.
        let provider = rustls::crypto::ring::default_provider();
        let key = CertifiedKey::from_der(chain, key_der, &provider)
            .map_err(|e| ProxyError::reload(&paths.private_key, e.to_string()))?;

        debug!(%fingerprint, chain_len, "certificate bundle parsed");
        Ok(Self {
            key: Arc::new(key),
            fingerprint,
            not_before,
            not_after,
        })
    }
}

fn read_chain(path: &Path) -> ProxyResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| ProxyError::reload(path, e.to_string()))?;
    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::reload(path, e.to_string()))?;
    if chain.is_empty() {
        return Err(ProxyError::reload(path, "no certificates found"));
    }
    Ok(chain)
}

fn validity(leaf: &CertificateDer<'_>) -> (Option<i64>, Option<i64>) {
    match CertificateParams::from_ca_cert_der(leaf) {
        Ok(params) => (
            Some(params.not_before.unix_timestamp()),
            Some(params.not_after.unix_timestamp()),
        ),
        Err(e) => {
            debug!(error = %e, "could not read certificate validity");
            (None, None)
        }
    }
}

/// Serves whatever bundle was installed last, for every server name.
#[derive(Debug)]
pub struct ReloadingResolver {
    current: RwLock<Arc<CertificateBundle>>,
}

impl ReloadingResolver {
    pub fn new(initial: CertificateBundle) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<CertificateBundle> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Make `bundle` the one presented by subsequent handshakes.
    pub fn install(&self, bundle: CertificateBundle) {
        let fingerprint = bundle.fingerprint.clone();
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(bundle),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(bundle),
        }
        info!(%fingerprint, "certificate installed");
    }
}

impl ResolvesServerCert for ReloadingResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current().key.clone())
    }
}

/// Server config with the given minimum version and ALPN `http/1.1`.
pub fn server_config(
    resolver: Arc<ReloadingResolver>,
    min_version: TlsVersion,
) -> ProxyResult<Arc<ServerConfig>> {
    let versions: &[&'static rustls::SupportedProtocolVersion] = match min_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };
    let mut config =
        ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_protocol_versions(versions)?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// A PEM certificate and private key.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Self-signed certificate for `domain`, used until a real one is issued.
pub fn generate_self_signed(domain: &str) -> ProxyResult<CertKeyPair> {
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "SyncStack");
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    info!(%domain, "generated self-signed certificate");
    Ok(CertKeyPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}
