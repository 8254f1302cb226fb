//! Fingerprint resolution for rate limiting and bot detection.

use axum::http::HeaderMap;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

/// Used when neither a session nor a client address can be resolved.
pub const SENTINEL_ADDRESS: &str = "127.0.0.1";

/// Proxy headers checked for a client address, in order.
const CLIENT_IP_HEADERS: [&str; 6] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "true-client-ip",
    "fly-client-ip",
    "x-client-ip",
];

/// Identity key that scopes rate-limit and bot decisions. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn sentinel() -> Self {
        Self(SENTINEL_ADDRESS.to_string())
    }

    /// Returns `None` for blank values so the caller can fall through.
    fn from_candidate(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the fingerprint: session user id, then client address, then the
/// sentinel. Never fails.
#[must_use]
pub fn resolve_fingerprint(
    session_user_id: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Fingerprint {
    session_user_id
        .and_then(Fingerprint::from_candidate)
        .or_else(|| {
            resolve_client_address(headers, peer)
                .and_then(|ip| Fingerprint::from_candidate(&ip.to_string()))
        })
        .unwrap_or_else(Fingerprint::sentinel)
}

/// Extract a client address from common proxy headers, falling back to the
/// peer socket address. Each list is read right to left, since the entries
/// nearest the end were appended by our own proxies, and only globally
/// routable addresses are accepted.
#[must_use]
pub fn resolve_client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|value| value.to_str().ok()))
        .find_map(last_global_ip)
        .or_else(|| peer.map(|addr| addr.ip().to_canonical()).filter(is_global))
}

fn last_global_ip(value: &str) -> Option<IpAddr> {
    value
        .rsplit(',')
        .map(str::trim)
        .filter_map(|candidate| candidate.parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
        .find(is_global)
}

/// True outside the special-purpose ranges.
fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_global_v4(*ip),
        IpAddr::V6(ip) => is_global_v6(*ip),
    }
}

fn is_global_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, d] = ip.octets();
    !(a == 0
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_documentation()
        || ip.is_multicast()
        // shared address space, 100.64.0.0/10
        || (a == 100 && b & 0xc0 == 64)
        // IETF protocol assignments, except the anycast relays
        || (a == 192 && b == 0 && c == 0 && d != 9 && d != 10)
        // benchmarking, 198.18.0.0/15
        || (a == 198 && b & 0xfe == 18)
        // reserved and broadcast, 240.0.0.0/4
        || a >= 240)
}

fn is_global_v6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // local-use translation, 64:ff9b:1::/48
        || (s[0] == 0x64 && s[1] == 0xff9b && s[2] == 1)
        // discard-only, 100::/64
        || (s[0] == 0x100 && s[1] == 0 && s[2] == 0 && s[3] == 0)
        // IETF protocol assignments, 2001::/23
        || (s[0] == 0x2001 && s[1] < 0x200)
        // documentation, 2001:db8::/32 and 3fff::/20
        || (s[0] == 0x2001 && s[1] == 0xdb8)
        || (s[0] == 0x3fff && s[1] < 0x1000)
        // unique local, fc00::/7
        || s[0] & 0xfe00 == 0xfc00
        // link-local, fe80::/10
        || s[0] & 0xffc0 == 0xfe80)
}
