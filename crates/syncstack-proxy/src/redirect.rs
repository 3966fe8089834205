//! Plaintext port: HTTPS redirect and ACME HTTP-01 challenges.
//!
//! Every request is answered with `301` to the same host and path on
//! `https://`, except `/.well-known/acme-challenge/<token>`, which is served
//! from the webroot without encryption so a CA can validate the domain.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// What the plaintext server does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainAction {
    /// `301` with this `Location`.
    Redirect(String),
    /// Serve the challenge file for this token.
    Challenge(String),
    /// Challenge path with an unusable token.
    NotFound,
    /// No host to redirect to.
    BadRequest,
}

/// Decide how to answer a plaintext request.
///
/// `host` is the request's Host header (a port, if any, is dropped);
/// `fallback_host` is used when the request has none.
pub fn plain_action(host: Option<&str>, path_and_query: &str, fallback_host: Option<&str>) -> PlainAction {
    if let Some(rest) = path_and_query.strip_prefix(ACME_CHALLENGE_PREFIX) {
        let token = rest.split(['?', '#']).next().unwrap_or_default();
        if valid_token(token) {
            return PlainAction::Challenge(token.to_string());
        }
        return PlainAction::NotFound;
    }

    let host = host
        .map(strip_port)
        .filter(|h| !h.is_empty())
        .or(fallback_host);
    match host {
        Some(host) => PlainAction::Redirect(https_location(host, path_and_query)),
        None => PlainAction::BadRequest,
    }
}

/// `https://<host><path>`, with `/` for an empty path.
pub fn https_location(host: &str, path_and_query: &str) -> String {
    if path_and_query.is_empty() {
        format!("https://{host}/")
    } else {
        format!("https://{host}{path_and_query}")
    }
}

/// Host header without its port. IPv6 literals keep their brackets.
pub(crate) fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Tokens are single path components.
fn valid_token(token: &str) -> bool {
    !token.is_empty() && !token.contains(['/', '\\']) && !token.contains("..")
}

/// Reads challenge files from `<webroot>/.well-known/acme-challenge/`.
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    dir: PathBuf,
}

impl ChallengeStore {
    pub fn new(webroot: &Path) -> Self {
        Self {
            dir: webroot.join(".well-known").join("acme-challenge"),
        }
    }

    pub async fn read(&self, token: &str) -> Option<Bytes> {
        if !valid_token(token) {
            return None;
        }
        let path = self.dir.join(token);
        match tokio::fs::read(&path).await {
            Ok(content) => Some(Bytes::from(content)),
            Err(e) => {
                debug!(?path, error = %e, "challenge file not readable");
                None
            }
        }
    }
}
