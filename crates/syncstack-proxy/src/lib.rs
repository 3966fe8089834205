//! syncstack-proxy: the TLS terminator in front of the stack.
//!
//! # Components
//!
//! - **`redirect`**: plaintext answers (HTTPS redirect, ACME challenges)
//! - **`route`**: host and path prefix to upstream, round-robin
//! - **`tls`**: certificate bundles and the swappable resolver
//! - **`reloader`**: periodic and on-demand certificate reload
//! - **`server`**: the two listeners and the reverse proxy
//! - **`terminator`**: wires them together

pub mod error;
pub mod redirect;
pub mod reloader;
pub mod route;
pub mod server;
pub mod terminator;
pub mod tls;

pub use error::{ProxyError, ProxyResult};
pub use redirect::{ACME_CHALLENGE_PREFIX, ChallengeStore, PlainAction, https_location, plain_action};
pub use reloader::{CertificateReloader, ReloadHandle, ReloadOutcome};
pub use route::{Router, Upstream};
pub use server::{HttpsServer, ProxyBody, RedirectServer, ReverseProxy, bind};
pub use terminator::{CERTIFICATE_NAME, RunningTerminator, TlsTerminator};
pub use tls::{CertKeyPair, CertificateBundle, ReloadingResolver, generate_self_signed, server_config};
