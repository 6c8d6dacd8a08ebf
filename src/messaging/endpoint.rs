//! Broker endpoint resolution.
//!
//! A broker configured as `localhost` is usually reachable under a different
//! name once the service runs inside a container: `host.docker.internal` from a
//! container talking to the host, or the compose service name from a sibling
//! container. The resolver turns one configured address into the ordered list
//! of addresses worth trying. It never touches the network.

use std::fmt;

use url::Url;

use crate::DEFAULT_ALTERNATE_HOSTS;

/// Hostnames that mean "this machine".
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// A broker URI as configured or derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    raw: String,
}

impl BrokerAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The URI exactly as it will be dialled.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Host component, without IPv6 brackets. `None` when the URI has no parseable host.
    pub fn host(&self) -> Option<String> {
        let url = Url::parse(&self.raw).ok()?;
        let host = url.host_str()?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }

    /// Whether the host refers to the local machine.
    pub fn is_loopback(&self) -> bool {
        self.host()
            .map(|h| LOOPBACK_HOSTS.iter().any(|l| l.eq_ignore_ascii_case(&h)))
            .unwrap_or(false)
    }

    /// The URI with any password masked, for logs and diagnostics.
    pub fn redacted(&self) -> String {
        match Url::parse(&self.raw) {
            Ok(mut url) if url.password().is_some() => {
                if url.set_password(Some("****")).is_ok() {
                    url.to_string()
                } else {
                    self.raw.clone()
                }
            }
            _ => self.raw.clone(),
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Derives candidate broker addresses from the configured one.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    alternate_hosts: Vec<String>,
}

impl EndpointResolver {
    /// Create a resolver that substitutes the given hosts, in order.
    pub fn new(alternate_hosts: Vec<String>) -> Self {
        Self { alternate_hosts }
    }

    /// Hosts substituted for a loopback host.
    pub fn alternate_hosts(&self) -> &[String] {
        &self.alternate_hosts
    }

    /// Build the candidate list for `configured`.
    ///
    /// The configured address always comes first and is kept verbatim. When its
    /// host is a loopback name, one candidate per alternate host follows, with
    /// scheme, userinfo, port, path and query preserved.
    pub fn resolve(&self, configured: &str) -> Vec<BrokerAddress> {
        let original = BrokerAddress::new(configured);
        if !original.is_loopback() {
            return vec![original];
        }

        let Ok(parsed) = Url::parse(configured) else {
            return vec![original];
        };

        let mut candidates = vec![original];
        for alt in &self.alternate_hosts {
            let mut url = parsed.clone();
            if url.set_host(Some(alt)).is_ok() {
                candidates.push(BrokerAddress::new(url.to_string()));
            }
        }
        candidates
    }
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ALTERNATE_HOSTS.iter().map(|h| h.to_string()).collect())
    }
}
