//! Client key derivation and the request view handed to limiters.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identity a counter bucket is keyed by.
///
/// Usually the originating network address of the request, but any
/// caller-supplied identity works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key used when no origin can be determined.
    pub const UNKNOWN: &'static str = "unknown";

    /// Create a key from an arbitrary identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Key for a request whose origin is unknown.
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// Key for a network address. IPv4-mapped IPv6 addresses collapse to IPv4.
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self(ip.to_string())
    }

    /// Parse the first entry of an `X-Forwarded-For` value.
    ///
    /// Returns `None` if the header is empty or its first hop is not an address.
    pub fn from_forwarded_for(header: &str) -> Option<Self> {
        let first = header.split(',').next()?.trim();
        first.parse::<IpAddr>().ok().map(Self::from_ip)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientKey {
    fn from(addr: SocketAddr) -> Self {
        // Port is dropped so reconnects from the same host share a bucket.
        Self::from_ip(addr.ip())
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl From<&str> for ClientKey {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Framework-independent view of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// HTTP method, uppercase
    pub method: String,
    /// Request path without query string
    pub path: String,
    /// Counting bucket for this request
    pub client: ClientKey,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>, client: ClientKey) -> Self {
        let path = path.into();
        let path = match path.split_once('?') {
            Some((p, _)) => p.to_string(),
            None => path,
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            client,
        }
    }
}
