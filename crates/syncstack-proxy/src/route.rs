//! Request routing: host and path to an upstream service.
//!
//! Rules match on an optional host and a path prefix. The longest matching
//! prefix wins; on a tie a rule naming the host beats a host-less one.
//! Each rule spreads requests over its upstreams round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use syncstack_core::config::RouteSpec;

/// The upstream selected for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub service: String,
    pub address: String,
}

struct Rule {
    host: Option<String>,
    prefix: String,
    service: String,
    upstreams: Vec<String>,
    counter: AtomicUsize,
}

impl Rule {
    fn matches(&self, host: Option<&str>, path: &str) -> bool {
        if let Some(rule_host) = &self.host {
            match host {
                Some(h) if h.eq_ignore_ascii_case(rule_host) => {}
                _ => return false,
            }
        }
        prefix_matches(&self.prefix, path)
    }
}

/// `/odktables` matches `/odktables` and `/odktables/x`, not `/odktablesx`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Routes requests to upstreams using round-robin.
pub struct Router {
    rules: Vec<Rule>,
}

impl Router {
    pub fn new(routes: &[RouteSpec]) -> Self {
        let rules = routes
            .iter()
            .map(|r| Rule {
                host: r.host.clone(),
                prefix: r.path_prefix.clone(),
                service: r.service.clone(),
                upstreams: r.upstreams.clone(),
                counter: AtomicUsize::new(0),
            })
            .collect();
        Self { rules }
    }

    /// Select the upstream for a request. `host` must not carry a port.
    pub fn route(&self, host: Option<&str>, path: &str) -> Option<Upstream> {
        let rule = self
            .rules
            .iter()
            .filter(|r| r.matches(host, path))
            .max_by_key(|r| (r.prefix.len(), r.host.is_some()))?;

        if rule.upstreams.is_empty() {
            return None;
        }
        let idx = rule.counter.fetch_add(1, Ordering::Relaxed) % rule.upstreams.len();
        let address = rule.upstreams[idx].clone();
        debug!(service = %rule.service, %address, %path, "routed request");
        Some(Upstream {
            service: rule.service.clone(),
            address,
        })
    }

    /// All services that have at least one rule.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.rules.iter().map(|r| r.service.clone()).collect();
        services.sort();
        services.dedup();
        services
    }
}
