//! Pool cache keys.
//!
//! Idle connections are bucketed by destination and/or proxy address:
//! - plain TCP, direct: destination only
//! - plain TCP via proxy: proxy only (any destination can be reached through it)
//! - TLS, direct: destination address and hostname
//! - TLS over a proxy tunnel: destination address, hostname and proxy

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// A resolved socket address together with the host name it was resolved from.
///
/// Two endpoints are equal when their socket addresses are equal; the host
/// name only matters for secure cache keys.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    addr: SocketAddr,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, addr: SocketAddr) -> Self {
        Self { host: host.into(), addr }
    }

    /// Endpoint whose host name is the literal IP address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), addr }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.addr)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_addr(addr)
    }
}

/// Identity under which idle connections are pooled.
///
/// Equality compares proxy and destination by address. Secure keys also
/// require the destination host names to match case-insensitively, so two TLS
/// identities served from one address never share connections. The hash only
/// covers (proxy, destination), which keeps it coherent with equality.
#[derive(Debug, Clone)]
pub struct CacheKey {
    destination: Option<Endpoint>,
    proxy: Option<Endpoint>,
    secure: bool,
}

impl CacheKey {
    /// Build a key exactly as given.
    pub fn new(secure: bool, destination: Option<Endpoint>, proxy: Option<Endpoint>) -> Self {
        Self { destination, proxy, secure }
    }

    /// Build the key a connection for this route is pooled under.
    ///
    /// For plain connections through a proxy the destination is irrelevant.
    pub fn for_route(secure: bool, destination: Option<Endpoint>, proxy: Option<Endpoint>) -> Self {
        let destination = if secure || proxy.is_none() { destination } else { None };
        Self::new(secure, destination, proxy)
    }

    pub fn destination(&self) -> Option<&Endpoint> {
        self.destination.as_ref()
    }

    pub fn proxy(&self) -> Option<&Endpoint> {
        self.proxy.as_ref()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        if self.secure != other.secure || self.proxy != other.proxy {
            return false;
        }
        match (&self.destination, &other.destination) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b && (!self.secure || a.host.eq_ignore_ascii_case(&b.host)),
            _ => false,
        }
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proxy.hash(state);
        self.destination.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "tls" } else { "tcp" };
        match (&self.destination, &self.proxy) {
            (Some(d), Some(p)) => write!(f, "{}://{} via {}", scheme, d, p),
            (Some(d), None) => write!(f, "{}://{}", scheme, d),
            (None, Some(p)) => write!(f, "{}://* via {}", scheme, p),
            (None, None) => write!(f, "{}://*", scheme),
        }
    }
}
