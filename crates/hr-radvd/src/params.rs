//! RA parameter snapshot.
//!
//! A snapshot describes what the daemon should advertise right now. The daemon
//! never edits one in place: a new configuration is always a new `RaParams`.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;

use ipnet::Ipv6Net;

use crate::packet::IPV6_MIN_MTU;

/// Tethered traffic has its hop limit decremented once more on the way out,
/// so advertise one more than the usual upstream unicast hop limit.
pub const DEFAULT_HOP_LIMIT: u8 = 65;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaParams {
    pub has_default_route: bool,
    pub hop_limit: u8,
    pub mtu: u32,
    pub prefixes: BTreeSet<Ipv6Net>,
    pub dnses: BTreeSet<Ipv6Addr>,
}

impl Default for RaParams {
    fn default() -> Self {
        Self {
            has_default_route: false,
            hop_limit: DEFAULT_HOP_LIMIT,
            mtu: IPV6_MIN_MTU as u32,
            prefixes: BTreeSet::new(),
            dnses: BTreeSet::new(),
        }
    }
}

impl RaParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_route(mut self, has_default_route: bool) -> Self {
        self.has_default_route = has_default_route;
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Add a prefix. Host bits are cleared so that `2001:db8::1/64` and
    /// `2001:db8::/64` are the same entry.
    pub fn with_prefix(mut self, prefix: Ipv6Net) -> Self {
        self.prefixes.insert(prefix.trunc());
        self
    }

    pub fn with_dns(mut self, dns: Ipv6Addr) -> Self {
        self.dnses.insert(dns);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.dnses.is_empty()
    }
}

/// Returns the part of `old` that stops being advertised when moving to `new`.
///
/// Only prefixes and DNS servers are compared; the other fields of the result
/// keep their defaults.
pub fn deprecated_params(old: Option<&RaParams>, new: Option<&RaParams>) -> RaParams {
    let mut deprecated = RaParams::default();

    if let Some(old) = old {
        deprecated.prefixes = old
            .prefixes
            .iter()
            .filter(|p| new.is_none_or(|n| !n.prefixes.contains(*p)))
            .copied()
            .collect();
        deprecated.dnses = old
            .dnses
            .iter()
            .filter(|d| new.is_none_or(|n| !n.dnses.contains(*d)))
            .copied()
            .collect();
    }

    deprecated
}

/// Whether a DNS server address is usable by hosts off this link: a global
/// unicast address that is not ULA, site-local, link-local, loopback or
/// multicast.
pub fn is_global_preferred(addr: &Ipv6Addr) -> bool {
    let first = addr.segments()[0];

    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_multicast()
        || (first & 0xffc0) == 0xfe80 // link-local
        || (first & 0xffc0) == 0xfec0 // site-local (deprecated)
        || (first & 0xfe00) == 0xfc00) // ULA
}
