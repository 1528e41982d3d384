//! Withdrawn prefixes and DNS servers that are still owed zero-lifetime
//! announcements.
//!
//! Each entry starts at [`MAX_URGENT_RTR_ADVERTISEMENTS`] and is decremented
//! once per multicast RA. An entry is dropped on the tick after it reaches
//! zero, so every withdrawal is advertised six times (counters 5..=0).

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use ipnet::Ipv6Net;

/// RFC 4861 §10. Also used as the initial withdrawal counter.
pub const MAX_URGENT_RTR_ADVERTISEMENTS: u32 = 5;

#[derive(Debug, Default, Clone)]
pub struct DeprecationTracker {
    prefixes: BTreeMap<Ipv6Net, u32>,
    dnses: BTreeMap<Ipv6Addr, u32>,
}

impl DeprecationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh entries with a full counter.
    pub fn put_all<'a>(
        &mut self,
        prefixes: impl IntoIterator<Item = &'a Ipv6Net>,
        dnses: impl IntoIterator<Item = &'a Ipv6Addr>,
    ) {
        for p in prefixes {
            self.prefixes.insert(*p, MAX_URGENT_RTR_ADVERTISEMENTS);
        }
        for d in dnses {
            self.dnses.insert(*d, MAX_URGENT_RTR_ADVERTISEMENTS);
        }
    }

    /// Drop entries that are advertised again.
    pub fn remove_all<'a>(
        &mut self,
        prefixes: impl IntoIterator<Item = &'a Ipv6Net>,
        dnses: impl IntoIterator<Item = &'a Ipv6Addr>,
    ) {
        for p in prefixes {
            self.prefixes.remove(p);
        }
        for d in dnses {
            self.dnses.remove(d);
        }
    }

    /// Age every entry by one tick. Returns true if anything was evicted.
    pub fn age_and_evict(&mut self) -> bool {
        let evicted = age(&mut self.prefixes);
        age(&mut self.dnses) || evicted
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.dnses.is_empty()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Ipv6Net> {
        self.prefixes.keys()
    }

    pub fn dnses(&self) -> impl Iterator<Item = &Ipv6Addr> {
        self.dnses.keys()
    }

    pub fn prefix_count(&self, prefix: &Ipv6Net) -> Option<u32> {
        self.prefixes.get(prefix).copied()
    }

    pub fn dns_count(&self, dns: &Ipv6Addr) -> Option<u32> {
        self.dnses.get(dns).copied()
    }
}

fn age<K: Ord>(table: &mut BTreeMap<K, u32>) -> bool {
    let before = table.len();
    table.retain(|_, remaining| {
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    });
    table.len() < before
}
