//! ICMPv6 Router Advertisement encoding (RFC 4861, RFC 4191, RFC 8106).
//!
//! The RA is written into a fixed 1280-byte buffer, one option at a time.
//! An option either fits entirely or is not written at all, so the packet
//! is always valid up to its current length. When an option does not fit
//! the assembler stops there and keeps what it already has.

use std::net::Ipv6Addr;

use bytes::{BufMut, Bytes, BytesMut};
use ipnet::Ipv6Net;
use tracing::error;

use crate::deprecation::DeprecationTracker;
use crate::error::{RaError, RaResult};
use crate::params::{DEFAULT_HOP_LIMIT, RaParams, is_global_preferred};

// ── ICMPv6 / ND constants ───────────────────────────────────────────────────

pub const IPV6_MIN_MTU: usize = 1280;

pub const ICMPV6_ROUTER_SOLICITATION: u8 = 133;
pub const ICMPV6_ROUTER_ADVERTISEMENT: u8 = 134;

/// ICMPv6 header (4) + RA header (12).
pub const ICMPV6_RA_HEADER_LEN: usize = 16;

const ND_OPTION_SLLA: u8 = 1;
const ND_OPTION_PIO: u8 = 3;
const ND_OPTION_MTU: u8 = 5;
const ND_OPTION_RDNSS: u8 = 25;

const PIO_FLAG_ON_LINK: u8 = 0x80;
const PIO_FLAG_AUTONOMOUS: u8 = 0x40;

/// RFC 4191 "high" default router preference.
const RA_FLAG_PREF_HIGH: u8 = 0x08;

/// Only /64 prefixes are usable for SLAAC (RFC 7421).
pub const RFC7421_PREFIX_LENGTH: u8 = 64;

/// Router lifetime advertised when providing a default route.
pub const DEFAULT_ROUTER_LIFETIME: u16 = 1800;

/// Valid/preferred lifetime of advertised prefixes and DNS servers.
pub const DEFAULT_LIFETIME: u32 = 4320;

// ── Option encoders ─────────────────────────────────────────────────────────

fn ra_header(has_default_route: bool, hop_limit: u8) -> [u8; ICMPV6_RA_HEADER_LEN] {
    let flags = if has_default_route { RA_FLAG_PREF_HIGH } else { 0 };
    let lifetime = if has_default_route { DEFAULT_ROUTER_LIFETIME } else { 0 };

    let mut hdr = [0u8; ICMPV6_RA_HEADER_LEN];
    hdr[0] = ICMPV6_ROUTER_ADVERTISEMENT;
    hdr[1] = 0; // Code
    // [2..4] Checksum, filled in by the kernel
    hdr[4] = hop_limit;
    hdr[5] = flags;
    hdr[6..8].copy_from_slice(&lifetime.to_be_bytes());
    // [8..12] Reachable time, [12..16] Retrans timer: unspecified
    hdr
}

/// Source link-layer address option. Only 6-byte (IEEE 802) addresses are supported.
fn slla_option(hw_addr: &[u8]) -> Option<[u8; 8]> {
    if hw_addr.len() != 6 {
        return None;
    }
    let mut opt = [0u8; 8];
    opt[0] = ND_OPTION_SLLA;
    opt[1] = 1; // 8 octets
    opt[2..8].copy_from_slice(hw_addr);
    Some(opt)
}

fn mtu_option(mtu: u32) -> [u8; 8] {
    let mtu = mtu.max(IPV6_MIN_MTU as u32);
    let mut opt = [0u8; 8];
    opt[0] = ND_OPTION_MTU;
    opt[1] = 1;
    opt[4..8].copy_from_slice(&mtu.to_be_bytes());
    opt
}

fn pio_option(prefix: &Ipv6Net, valid: u32, preferred: u32) -> Option<[u8; 32]> {
    if prefix.prefix_len() != RFC7421_PREFIX_LENGTH {
        return None;
    }
    let preferred = preferred.min(valid);

    let mut opt = [0u8; 32];
    opt[0] = ND_OPTION_PIO;
    opt[1] = 4; // 32 octets
    opt[2] = prefix.prefix_len();
    opt[3] = PIO_FLAG_ON_LINK | PIO_FLAG_AUTONOMOUS;
    opt[4..8].copy_from_slice(&valid.to_be_bytes());
    opt[8..12].copy_from_slice(&preferred.to_be_bytes());
    // [12..16] Reserved
    opt[16..32].copy_from_slice(&prefix.network().octets());
    Some(opt)
}

/// RDNSS option carrying every globally-preferred address in `dnses`, or
/// `None` if there are none.
fn rdnss_option<'a>(dnses: impl IntoIterator<Item = &'a Ipv6Addr>, lifetime: u32) -> Option<Vec<u8>> {
    let servers: Vec<&Ipv6Addr> = dnses.into_iter().filter(|d| is_global_preferred(d)).collect();
    if servers.is_empty() {
        return None;
    }

    let mut opt = Vec::with_capacity(8 + 16 * servers.len());
    opt.push(ND_OPTION_RDNSS);
    opt.push((1 + 2 * servers.len()) as u8);
    opt.extend_from_slice(&[0, 0]); // Reserved
    opt.extend_from_slice(&lifetime.to_be_bytes());
    for dns in servers {
        opt.extend_from_slice(&dns.octets());
    }
    Some(opt)
}

// ── Assembly ────────────────────────────────────────────────────────────────

/// Fixed-capacity RA writer. Each `put` is all-or-nothing.
struct RaBuilder {
    buf: BytesMut,
    has_content: bool,
}

impl RaBuilder {
    fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(IPV6_MIN_MTU),
            has_content: false,
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn put(&mut self, bytes: &[u8]) -> RaResult<()> {
        let remaining = IPV6_MIN_MTU - self.buf.len();
        if bytes.len() > remaining {
            return Err(RaError::Overflow {
                needed: bytes.len(),
                remaining,
            });
        }
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Put an option that makes the RA worth sending (PIO or RDNSS).
    fn put_content(&mut self, bytes: &[u8]) -> RaResult<()> {
        self.put(bytes)?;
        self.has_content = true;
        Ok(())
    }
}

/// Result of one assembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledRa {
    /// Empty when there is nothing worth announcing.
    pub packet: Bytes,
    pub should_send: bool,
}

impl AssembledRa {
    pub fn len(&self) -> usize {
        self.packet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }
}

/// Render the current snapshot plus pending withdrawals into an RA.
///
/// Overflow is not an error for the caller: the RA is cut at the last option
/// that fit and the truncation is logged.
pub fn assemble_ra(
    params: Option<&RaParams>,
    deprecated: &DeprecationTracker,
    hw_addr: &[u8],
) -> AssembledRa {
    let mut ra = RaBuilder::new();

    if let Err(e) = put_options(&mut ra, params, deprecated, hw_addr) {
        error!(length = ra.len(), "Could not construct complete RA, truncated: {}", e);
    }

    if !ra.has_content {
        return AssembledRa::default();
    }

    AssembledRa {
        packet: ra.buf.freeze(),
        should_send: true,
    }
}

fn put_options(
    ra: &mut RaBuilder,
    params: Option<&RaParams>,
    deprecated: &DeprecationTracker,
    hw_addr: &[u8],
) -> RaResult<()> {
    let has_default_route = params.is_some_and(|p| p.has_default_route);
    let hop_limit = params.map_or(DEFAULT_HOP_LIMIT, |p| p.hop_limit);

    ra.put(&ra_header(has_default_route, hop_limit))?;
    if let Some(slla) = slla_option(hw_addr) {
        ra.put(&slla)?;
    }

    // No RFC 5175 expanded flags option: it must not be sent with no flags set.

    if let Some(params) = params {
        ra.put(&mtu_option(params.mtu))?;

        for prefix in &params.prefixes {
            if let Some(pio) = pio_option(prefix, DEFAULT_LIFETIME, DEFAULT_LIFETIME) {
                ra.put_content(&pio)?;
            }
        }

        if let Some(rdnss) = rdnss_option(&params.dnses, DEFAULT_LIFETIME) {
            ra.put_content(&rdnss)?;
        }
    }

    for prefix in deprecated.prefixes() {
        if let Some(pio) = pio_option(prefix, 0, 0) {
            ra.put_content(&pio)?;
        }
    }

    if let Some(rdnss) = rdnss_option(deprecated.dnses(), 0) {
        ra.put_content(&rdnss)?;
    }

    Ok(())
}

// ── Decoding ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix: Ipv6Net,
    pub flags: u8,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveDns {
    pub lifetime: u32,
    pub servers: Vec<Ipv6Addr>,
}

/// A decoded Router Advertisement. Unknown options are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRa {
    pub hop_limit: u8,
    pub flags: u8,
    pub router_lifetime: u16,
    pub reachable_time: u32,
    pub retrans_timer: u32,
    pub source_lla: Option<[u8; 6]>,
    pub mtu: Option<u32>,
    pub prefixes: Vec<PrefixInformation>,
    pub rdnss: Vec<RecursiveDns>,
}

/// Decode an ICMPv6 RA. Returns `None` on anything malformed.
pub fn parse_ra(data: &[u8]) -> Option<ParsedRa> {
    if data.len() < ICMPV6_RA_HEADER_LEN || data[0] != ICMPV6_ROUTER_ADVERTISEMENT {
        return None;
    }

    let mut ra = ParsedRa {
        hop_limit: data[4],
        flags: data[5],
        router_lifetime: u16::from_be_bytes([data[6], data[7]]),
        reachable_time: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        retrans_timer: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
        ..Default::default()
    };

    let mut offset = ICMPV6_RA_HEADER_LEN;
    while offset + 2 <= data.len() {
        let opt_type = data[offset];
        let len = data[offset + 1] as usize * 8;
        if len == 0 || offset + len > data.len() {
            return None;
        }
        let opt = &data[offset..offset + len];

        match opt_type {
            ND_OPTION_SLLA if len == 8 => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&opt[2..8]);
                ra.source_lla = Some(mac);
            }
            ND_OPTION_MTU if len == 8 => {
                ra.mtu = Some(u32::from_be_bytes([opt[4], opt[5], opt[6], opt[7]]));
            }
            ND_OPTION_PIO if len == 32 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&opt[16..32]);
                let prefix = Ipv6Net::new(Ipv6Addr::from(octets), opt[2]).ok()?;
                ra.prefixes.push(PrefixInformation {
                    prefix,
                    flags: opt[3],
                    valid_lifetime: u32::from_be_bytes([opt[4], opt[5], opt[6], opt[7]]),
                    preferred_lifetime: u32::from_be_bytes([opt[8], opt[9], opt[10], opt[11]]),
                });
            }
            ND_OPTION_RDNSS if len >= 24 && (len - 8) % 16 == 0 => {
                let servers = opt[8..]
                    .chunks_exact(16)
                    .map(|c| {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(c);
                        Ipv6Addr::from(octets)
                    })
                    .collect();
                ra.rdnss.push(RecursiveDns {
                    lifetime: u32::from_be_bytes([opt[4], opt[5], opt[6], opt[7]]),
                    servers,
                });
            }
            _ => {}
        }

        offset += len;
    }

    Some(ra)
}
