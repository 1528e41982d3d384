//! Unicast responder: answers Router Solicitations with the current RA.

use std::net::SocketAddrV6;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::daemon::RaShared;
use crate::error::RaError;
use crate::packet::{ICMPV6_ROUTER_SOLICITATION, IPV6_MIN_MTU};
use crate::socket::RaTransport;

/// Minimal validation: only the ICMPv6 type is looked at.
pub fn is_router_solicitation(data: &[u8]) -> bool {
    data.first() == Some(&ICMPV6_ROUTER_SOLICITATION)
}

/// Where to send the reply to a solicitation from `src`.
///
/// Only the all-nodes group or a link-local address on this very interface
/// get a direct reply. Any other source gets the RA multicast to all nodes.
pub fn reply_destination(src: &SocketAddrV6, all_nodes: &SocketAddrV6, ifindex: u32) -> SocketAddrV6 {
    let same_scope = src.scope_id() == ifindex;

    if (src.ip() == all_nodes.ip() && src.scope_id() == all_nodes.scope_id())
        || (src.ip().is_unicast_link_local() && same_scope)
    {
        return SocketAddrV6::new(*src.ip(), 0, 0, src.scope_id());
    }

    *all_nodes
}

pub(crate) async fn run_unicast_responder<T: RaTransport>(shared: Arc<RaShared>, socket: Arc<T>) {
    info!(interface = %shared.iface.name, "RA unicast responder started");

    // Larger solicitations are truncated; only byte 0 matters.
    let mut solicitation = [0u8; IPV6_MIN_MTU];

    while socket.is_open() {
        let src = match socket.recv_from(&mut solicitation).await {
            Ok((len, src)) if is_router_solicitation(&solicitation[..len]) => src,
            Ok(_) => continue,
            Err(RaError::SocketClosed) => break,
            Err(e) => {
                if socket.is_open() {
                    warn!(interface = %shared.iface.name, "recvfrom error: {}", e);
                }
                continue;
            }
        };

        let dest = reply_destination(&src, &shared.all_nodes, shared.iface.index);
        debug!(src = %src.ip(), dest = %dest.ip(), "Router Solicitation received");
        shared.send_ra(socket.as_ref(), dest).await;
    }

    info!(interface = %shared.iface.name, "RA unicast responder stopped");
}
