//! Raw ICMPv6 socket scoped to a single interface.
//!
//! The socket only ever goes from open to closed. Closing it wakes any task
//! blocked in `recv_from`; both actors treat `SocketClosed` as their signal
//! to stop.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::{RaError, RaResult};

pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// RFC 4861 requires hop limit 255 on all ND messages.
const ND_HOP_LIMIT: u32 = 255;

const SEND_TIMEOUT: Duration = Duration::from_millis(300);

/// The interface the daemon advertises on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceParams {
    pub name: String,
    pub index: u32,
    /// Hardware address. Anything but 6 bytes means no SLLA option.
    pub hw_addr: Vec<u8>,
}

impl InterfaceParams {
    pub fn new(name: impl Into<String>, index: u32, hw_addr: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            index,
            hw_addr: hw_addr.into(),
        }
    }

    pub fn validate(&self) -> RaResult<()> {
        if self.name.is_empty() {
            return Err(RaError::InvalidInterface("empty interface name".into()));
        }
        if self.index == 0 {
            return Err(RaError::InvalidInterface(format!("{} has no interface index", self.name)));
        }
        Ok(())
    }

    /// `ff02::1%<index>`.
    pub fn all_nodes(&self) -> SocketAddrV6 {
        all_nodes_for_scope(self.index)
    }
}

pub fn all_nodes_for_scope(scope_id: u32) -> SocketAddrV6 {
    SocketAddrV6::new(ALL_NODES, 0, 0, scope_id)
}

/// Open/closed state of a transport, the part the daemon handle needs.
pub trait Closable: Send + Sync {
    fn is_open(&self) -> bool;

    /// Mark closed. Pending and future sends and receives fail with
    /// [`RaError::SocketClosed`].
    fn close(&self);
}

/// Datagram transport the transmitter and responder run on.
pub trait RaTransport: Closable + 'static {
    fn send_to(&self, buf: &[u8], dest: SocketAddrV6) -> impl Future<Output = RaResult<usize>> + Send;

    /// Wait for a datagram or for the transport to be closed.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = RaResult<(usize, SocketAddrV6)>> + Send;
}

pub struct RaSocket {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl RaSocket {
    /// Create the raw socket, bind it to the interface and register it with
    /// the runtime. Must be called from within a tokio runtime.
    pub fn open(iface: &InterfaceParams) -> RaResult<Self> {
        iface.validate()?;

        let socket = create_ra_socket(iface).map_err(RaError::Socket)?;
        let socket = UdpSocket::from_std(socket.into()).map_err(RaError::Socket)?;
        let (closed, _) = watch::channel(false);

        Ok(Self { socket, closed })
    }
}

impl Closable for RaSocket {
    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// The descriptor itself is released once the last holder drops it.
    fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl RaTransport for RaSocket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddrV6) -> RaResult<usize> {
        if !self.is_open() {
            return Err(RaError::SocketClosed);
        }

        let mut closed = self.closed.subscribe();
        tokio::select! {
            res = tokio::time::timeout(SEND_TIMEOUT, self.socket.send_to(buf, SocketAddr::V6(dest))) => {
                match res {
                    Ok(sent) => Ok(sent?),
                    Err(_) => Err(RaError::Io(std::io::ErrorKind::TimedOut.into())),
                }
            }
            _ = closed.wait_for(|c| *c) => Err(RaError::SocketClosed),
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> RaResult<(usize, SocketAddrV6)> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            res = self.socket.recv_from(buf) => {
                match res? {
                    (len, SocketAddr::V6(src)) => Ok((len, src)),
                    (_, SocketAddr::V4(src)) => Err(RaError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unexpected IPv4 source {}", src),
                    ))),
                }
            }
            _ = closed.wait_for(|c| *c) => Err(RaError::SocketClosed),
        }
    }
}

fn create_ra_socket(iface: &InterfaceParams) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?;

    socket.set_write_timeout(Some(SEND_TIMEOUT))?;

    #[cfg(target_os = "linux")]
    socket.bind_device(Some(iface.name.as_bytes()))?;

    socket.set_multicast_if_v6(iface.index)?;
    socket.set_multicast_hops_v6(ND_HOP_LIMIT)?;
    socket.set_unicast_hops_v6(ND_HOP_LIMIT)?;

    // Router Solicitations are sent to ff02::2.
    socket.join_multicast_v6(&ALL_ROUTERS, iface.index)?;

    socket.set_nonblocking(true)?;
    Ok(socket)
}
