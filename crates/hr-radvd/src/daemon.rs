//! Router Advertisement daemon for one interface.
//!
//! Owns the assembled RA, the current parameters and the deprecation tracker
//! behind a single lock, and runs the multicast transmitter and unicast
//! responder while started.

use std::net::SocketAddrV6;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::deprecation::DeprecationTracker;
use crate::error::{RaError, RaResult};
use crate::packet::{AssembledRa, ICMPV6_RA_HEADER_LEN, assemble_ra};
use crate::params::RaParams;
use crate::responder::run_unicast_responder;
use crate::socket::{Closable, InterfaceParams, RaSocket, RaTransport};
use crate::transmitter::{UrgentCounter, run_multicast_transmitter};

/// Everything guarded by the daemon lock.
#[derive(Debug, Default)]
struct RaState {
    params: Option<RaParams>,
    deprecated: DeprecationTracker,
    ra: AssembledRa,
}

/// State shared between the daemon handle and its two actors.
pub(crate) struct RaShared {
    pub(crate) iface: InterfaceParams,
    pub(crate) all_nodes: SocketAddrV6,
    state: Mutex<RaState>,
    pub(crate) wake: Notify,
    pub(crate) urgent: UrgentCounter,
}

impl RaShared {
    fn new(iface: InterfaceParams) -> Self {
        Self {
            all_nodes: iface.all_nodes(),
            iface,
            state: Mutex::new(RaState::default()),
            wake: Notify::new(),
            urgent: UrgentCounter::default(),
        }
    }

    fn reassemble(&self, state: &mut RaState) {
        state.ra = assemble_ra(state.params.as_ref(), &state.deprecated, &self.iface.hw_addr);
        debug!(
            interface = %self.iface.name,
            length = state.ra.len(),
            "RA assembled"
        );
    }

    async fn install(&self, deprecated: Option<RaParams>, new: Option<RaParams>) {
        let mut state = self.state.lock().await;

        if let Some(deprecated) = &deprecated {
            state.deprecated.put_all(&deprecated.prefixes, &deprecated.dnses);
        }
        if let Some(new) = &new {
            // No longer deprecated.
            state.deprecated.remove_all(&new.prefixes, &new.dnses);
        }

        state.params = new;
        self.reassemble(&mut state);
    }

    /// Start an urgent burst and cut the transmitter's current sleep short.
    pub(crate) fn hup(&self) {
        self.urgent.arm();
        self.wake.notify_one();
    }

    /// Whether there is an RA to send, and whether a deprecation is in progress.
    pub(crate) async fn send_state(&self) -> (bool, bool) {
        let state = self.state.lock().await;
        (state.ra.len() >= ICMPV6_RA_HEADER_LEN, !state.deprecated.is_empty())
    }

    pub(crate) async fn current_ra(&self) -> Bytes {
        self.state.lock().await.ra.packet.clone()
    }

    /// One multicast tick of the deprecation counters. Reassembles if an
    /// entry expired.
    pub(crate) async fn age_deprecations(&self) -> bool {
        let mut state = self.state.lock().await;
        let evicted = state.deprecated.age_and_evict();
        if evicted {
            self.reassemble(&mut state);
        }
        evicted
    }

    /// Send the current RA, if any. The lock is not held during I/O.
    pub(crate) async fn send_ra<T: RaTransport>(&self, socket: &T, dest: SocketAddrV6) {
        let packet = self.current_ra().await;
        if packet.len() < ICMPV6_RA_HEADER_LEN {
            return;
        }

        match socket.send_to(&packet, dest).await {
            Ok(_) => debug!(dest = %dest.ip(), length = packet.len(), "RA sent"),
            Err(RaError::SocketClosed) => {}
            Err(e) => {
                if socket.is_open() {
                    warn!(dest = %dest.ip(), "sendto error: {}", e);
                }
            }
        }
    }
}

pub struct RaDaemon {
    shared: Arc<RaShared>,
    socket: Option<Arc<dyn Closable>>,
    transmitter: Option<JoinHandle<()>>,
    responder: Option<JoinHandle<()>>,
}

impl RaDaemon {
    pub fn new(iface: InterfaceParams) -> Self {
        Self {
            shared: Arc::new(RaShared::new(iface)),
            socket: None,
            transmitter: None,
            responder: None,
        }
    }

    pub fn interface(&self) -> &InterfaceParams {
        &self.shared.iface
    }

    pub fn is_running(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.is_open())
    }

    /// Install a new configuration.
    ///
    /// `deprecated` holds what is being withdrawn (see
    /// [`deprecated_params`](crate::params::deprecated_params)); `new` is what
    /// to advertise from now on. When this returns, the assembled RA already
    /// reflects `new`.
    pub async fn install(&self, deprecated: Option<RaParams>, new: Option<RaParams>) {
        self.shared.install(deprecated, new).await;
        self.shared.hup();
    }

    /// Open the socket and launch both actors. Must be called from within a
    /// tokio runtime.
    pub fn start(&mut self) -> RaResult<()> {
        if self.is_running() {
            warn!(interface = %self.shared.iface.name, "RA daemon already running");
            return Ok(());
        }

        let socket = match RaSocket::open(&self.shared.iface) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!(interface = %self.shared.iface.name, "Failed to create RA daemon socket: {}", e);
                return Err(e);
            }
        };
        self.spawn_actors(socket);

        info!(
            interface = %self.shared.iface.name,
            index = self.shared.iface.index,
            "RA daemon started"
        );
        Ok(())
    }

    fn spawn_actors<T: RaTransport>(&mut self, transport: Arc<T>) {
        self.transmitter = Some(tokio::spawn(run_multicast_transmitter(
            self.shared.clone(),
            transport.clone(),
        )));
        self.responder = Some(tokio::spawn(run_unicast_responder(
            self.shared.clone(),
            transport.clone(),
        )));
        self.socket = Some(transport);
    }

    /// Close the socket and let both actors wind down. Does not wait for them.
    pub fn stop(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        socket.close();
        // Interrupt a potential day-long sleep. If the transmitter is not
        // parked the permit can outlive it, and a later start() then sends
        // once right away.
        self.shared.wake.notify_one();
        self.transmitter = None;
        self.responder = None;

        info!(interface = %self.shared.iface.name, "RA daemon stopped");
    }

    /// The RA as it would be sent right now. Empty if nothing is advertised.
    pub async fn current_ra(&self) -> Bytes {
        self.shared.current_ra().await
    }

    pub async fn current_params(&self) -> Option<RaParams> {
        self.shared.state.lock().await.params.clone()
    }
}

impl Drop for RaDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;
    use std::time::Duration;

    use ipnet::Ipv6Net;
    use tokio::sync::{mpsc, watch};
    use tokio::time::Instant;

    use super::*;
    use crate::packet::{ICMPV6_ROUTER_SOLICITATION, parse_ra};
    use crate::params::deprecated_params;
    use crate::transmitter::DAY_IN_SECONDS;

    type Sent = (Instant, SocketAddrV6, Bytes);

    /// In-memory transport: records every send, delivers injected datagrams.
    struct MemoryLink {
        closed: watch::Sender<bool>,
        sent: std::sync::Mutex<Vec<Sent>>,
        inbox_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddrV6)>,
        inbox: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddrV6)>>,
    }

    impl MemoryLink {
        fn new() -> Arc<Self> {
            let (inbox_tx, inbox) = mpsc::unbounded_channel();
            Arc::new(Self {
                closed: watch::channel(false).0,
                sent: Default::default(),
                inbox_tx,
                inbox: Mutex::new(inbox),
            })
        }

        fn inject(&self, data: &[u8], src: SocketAddrV6) {
            self.inbox_tx.send((data.to_vec(), src)).unwrap();
        }

        fn sends(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Closable for MemoryLink {
        fn is_open(&self) -> bool {
            !*self.closed.borrow()
        }

        fn close(&self) {
            self.closed.send_replace(true);
        }
    }

    impl RaTransport for MemoryLink {
        async fn send_to(&self, buf: &[u8], dest: SocketAddrV6) -> RaResult<usize> {
            if !self.is_open() {
                return Err(RaError::SocketClosed);
            }
            self.sent
                .lock()
                .unwrap()
                .push((Instant::now(), dest, Bytes::copy_from_slice(buf)));
            Ok(buf.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> RaResult<(usize, SocketAddrV6)> {
            let mut closed = self.closed.subscribe();
            let mut inbox = self.inbox.lock().await;
            tokio::select! {
                Some((data, src)) = inbox.recv() => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok((len, src))
                }
                _ = closed.wait_for(|c| *c) => Err(RaError::SocketClosed),
            }
        }
    }

    fn secs_between(earlier: Instant, later: Instant) -> u64 {
        (later - earlier).as_secs()
    }

    fn daemon() -> RaDaemon {
        RaDaemon::new(InterfaceParams::new("wlan1", 4, vec![0x02, 0, 0, 0, 0, 1]))
    }

    fn prefix() -> Ipv6Net {
        "2001:db8:1::/64".parse().unwrap()
    }

    fn dns() -> Ipv6Addr {
        "2001:db8:1::1".parse().unwrap()
    }

    fn params() -> RaParams {
        RaParams::new()
            .with_default_route(true)
            .with_mtu(1500)
            .with_prefix(prefix())
            .with_dns(dns())
    }

    /// (prefix lifetime, dns lifetime) as currently assembled.
    async fn advertised(d: &RaDaemon) -> (Option<u32>, Option<u32>) {
        lifetimes(&d.current_ra().await)
    }

    fn lifetimes(ra: &[u8]) -> (Option<u32>, Option<u32>) {
        let Some(parsed) = parse_ra(ra) else {
            return (None, None);
        };
        let p = parsed.prefixes.iter().find(|p| p.prefix == prefix()).map(|p| p.valid_lifetime);
        let r = parsed.rdnss.iter().find(|r| r.servers.contains(&dns())).map(|r| r.lifetime);
        (p, r)
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let d = daemon();
        d.install(None, Some(params())).await;
        let first = d.current_ra().await;
        d.install(None, Some(params())).await;
        let second = d.current_ra().await;
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_install_empty_params_sends_nothing() {
        let d = daemon();
        d.install(None, Some(RaParams::new())).await;
        assert!(d.current_ra().await.is_empty());
        assert_eq!(d.shared.send_state().await, (false, false));
    }

    #[tokio::test]
    async fn test_withdrawal_announced_six_times() {
        let d = daemon();
        let old = params();
        d.install(None, Some(old.clone())).await;
        assert_eq!(advertised(&d).await, (Some(4320), Some(4320)));

        d.install(Some(deprecated_params(Some(&old), None)), None).await;
        assert!(d.current_params().await.is_none());
        {
            let state = d.shared.state.lock().await;
            assert_eq!(state.deprecated.prefix_count(&prefix()), Some(5));
            assert_eq!(state.deprecated.dns_count(&dns()), Some(5));
        }

        let mut withdrawals = 0;
        for _ in 0..10 {
            match advertised(&d).await {
                (Some(0), Some(0)) => withdrawals += 1,
                (None, None) => break,
                other => panic!("unexpected advertisement {:?}", other),
            }
            assert_eq!(d.shared.send_state().await, (true, true));
            d.shared.age_deprecations().await;
        }

        assert_eq!(withdrawals, 6);
        assert!(d.current_ra().await.is_empty());
        assert_eq!(d.shared.send_state().await, (false, false));
    }

    #[tokio::test]
    async fn test_resurrection_removes_withdrawal() {
        let d = daemon();
        let old = params();
        d.install(None, Some(old.clone())).await;
        d.install(Some(deprecated_params(Some(&old), None)), None).await;
        d.shared.age_deprecations().await;
        d.shared.age_deprecations().await;
        assert_eq!(advertised(&d).await, (Some(0), Some(0)));

        d.install(Some(deprecated_params(None, Some(&old))), Some(old.clone())).await;
        assert_eq!(advertised(&d).await, (Some(4320), Some(4320)));

        let parsed = parse_ra(&d.current_ra().await).unwrap();
        assert_eq!(parsed.prefixes.len(), 1);
        assert_eq!(parsed.rdnss.len(), 1);
        assert_eq!(d.shared.send_state().await, (true, false));
    }

    #[tokio::test]
    async fn test_prefix_change_keeps_new_and_withdraws_old() {
        let d = daemon();
        let old = params();
        let new = RaParams::new()
            .with_default_route(true)
            .with_prefix("2001:db8:2::/64".parse().unwrap())
            .with_dns(dns());
        d.install(None, Some(old.clone())).await;
        d.install(Some(deprecated_params(Some(&old), Some(&new))), Some(new.clone())).await;

        let parsed = parse_ra(&d.current_ra().await).unwrap();
        let lifetimes: Vec<(Ipv6Net, u32)> =
            parsed.prefixes.iter().map(|p| (p.prefix, p.valid_lifetime)).collect();
        assert_eq!(
            lifetimes,
            vec![("2001:db8:2::/64".parse().unwrap(), 4320), (prefix(), 0)]
        );
        // DNS unchanged: advertised once, not withdrawn.
        assert_eq!(parsed.rdnss.len(), 1);
        assert_eq!(parsed.rdnss[0].lifetime, 4320);
    }

    #[tokio::test]
    async fn test_install_arms_urgent_burst() {
        let d = daemon();
        d.install(None, Some(params())).await;

        // The pending wake is stored even though nobody is sleeping yet.
        tokio::time::timeout(std::time::Duration::from_secs(1), d.shared.wake.notified())
            .await
            .unwrap();
        for _ in 0..4 {
            assert!(d.shared.urgent.take());
        }
        assert!(!d.shared.urgent.take());
    }

    #[tokio::test]
    async fn test_start_with_invalid_interface_fails() {
        let mut d = RaDaemon::new(InterfaceParams::new("wlan1", 0, vec![]));
        assert!(matches!(d.start(), Err(RaError::InvalidInterface(_))));
        assert!(!d.is_running());
        assert!(d.transmitter.is_none());
        assert!(d.responder.is_none());
        d.stop();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut d = daemon();
        d.stop();
        assert!(!d.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_sends_burst_then_periodic() {
        let mut d = daemon();
        let link = MemoryLink::new();
        d.spawn_actors(link.clone());

        // Nothing to advertise yet: the transmitter parks for a day.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(link.sends().is_empty());

        let installed = Instant::now();
        d.install(None, Some(params())).await;
        tokio::time::sleep(Duration::from_secs(700)).await;

        let sent = link.sends();
        assert!(sent.len() >= 6, "only {} RAs sent", sent.len());
        assert!(sent.iter().all(|(_, dest, _)| *dest == d.shared.all_nodes));
        assert_eq!(secs_between(installed, sent[0].0), 0);
        for pair in sent[..5].windows(2) {
            assert_eq!(secs_between(pair[0].0, pair[1].0), 3);
        }
        let periodic = secs_between(sent[4].0, sent[5].0);
        assert!((300..=600).contains(&periodic), "periodic interval {}", periodic);
        assert_eq!(lifetimes(&sent[0].2), (Some(4320), Some(4320)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_before_start_is_kept() {
        let mut d = daemon();
        let started = Instant::now();
        d.install(None, Some(params())).await;

        let link = MemoryLink::new();
        d.spawn_actors(link.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;

        let sent = link.sends();
        assert!(sent.len() >= 2);
        assert_eq!(secs_between(started, sent[0].0), 0);
        assert_eq!(secs_between(sent[0].0, sent[1].0), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawal_sent_six_times_then_silence() {
        let mut d = daemon();
        let link = MemoryLink::new();
        d.spawn_actors(link.clone());

        let old = params();
        d.install(None, Some(old.clone())).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        let before = link.sends().len();

        d.install(Some(deprecated_params(Some(&old), None)), None).await;
        tokio::time::sleep(Duration::from_secs(3 * DAY_IN_SECONDS)).await;

        let withdrawals = link.sends().split_off(before);
        assert_eq!(withdrawals.len(), 6);
        for (_, _, packet) in &withdrawals {
            assert_eq!(lifetimes(packet), (Some(0), Some(0)));
        }
        for pair in withdrawals.windows(2) {
            assert_eq!(secs_between(pair[0].0, pair[1].0), 3);
        }

        // Evicted after the last one, and the RA was reassembled empty.
        assert!(d.current_ra().await.is_empty());
        assert_eq!(d.shared.send_state().await, (false, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_solicitation_gets_unicast_reply() {
        let mut d = daemon();
        let link = MemoryLink::new();
        d.spawn_actors(link.clone());
        d.install(None, Some(params())).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        let before = link.sends().len();

        let host = SocketAddrV6::new("fe80::1234".parse().unwrap(), 0, 0, 4);
        link.inject(&[ICMPV6_ROUTER_SOLICITATION, 0, 0, 0, 0, 0, 0, 0], host);
        // Neighbour Solicitation: ignored.
        link.inject(&[135, 0, 0, 0], host);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let replies = link.sends().split_off(before);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, host);
        assert_eq!(replies[0].2, d.current_ra().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_parked_actors() {
        let mut d = daemon();
        let link = MemoryLink::new();
        d.spawn_actors(link.clone());
        assert!(d.is_running());

        // Transmitter in its day-long sleep, responder blocked in receive.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let transmitter = d.transmitter.take().unwrap();
        let responder = d.responder.take().unwrap();
        d.stop();

        assert!(!link.is_open());
        assert!(!d.is_running());
        tokio::time::timeout(Duration::from_secs(1), transmitter)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), responder)
            .await
            .unwrap()
            .unwrap();
        assert!(link.sends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_resumes_periodic() {
        let mut d = daemon();
        let first = MemoryLink::new();
        d.spawn_actors(first.clone());
        d.install(None, Some(params())).await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        let transmitter = d.transmitter.take().unwrap();
        d.stop();
        tokio::time::timeout(Duration::from_secs(1), transmitter)
            .await
            .unwrap()
            .unwrap();
        let sent_before_stop = first.sends().len();

        let second = MemoryLink::new();
        let restarted = Instant::now();
        d.spawn_actors(second.clone());
        tokio::time::sleep(Duration::from_secs(700)).await;

        assert_eq!(first.sends().len(), sent_before_stop);
        // stop() woke the parked transmitter, so no wake carries over.
        let sent = second.sends();
        assert!(!sent.is_empty());
        let delay = secs_between(restarted, sent[0].0);
        assert!((300..=600).contains(&delay), "first RA after {}s", delay);
    }
}
