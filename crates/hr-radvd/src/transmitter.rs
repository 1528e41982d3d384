//! Multicast transmitter: periodic and urgent unsolicited RAs to ff02::1.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::daemon::RaShared;
use crate::deprecation::MAX_URGENT_RTR_ADVERTISEMENTS;
use crate::socket::RaTransport;

pub const MIN_RTR_ADV_INTERVAL_SEC: u64 = 300;
pub const MAX_RTR_ADV_INTERVAL_SEC: u64 = 600;
/// RFC 4861 §10.
pub const MIN_DELAY_BETWEEN_RAS_SEC: u64 = 3;
pub const DAY_IN_SECONDS: u64 = 86_400;

/// Remaining RAs to send at the minimum interval.
#[derive(Debug, Default)]
pub struct UrgentCounter(AtomicI32);

impl UrgentCounter {
    /// Start an urgent burst. One fewer than the burst size: the wake that
    /// goes with it sends one RA immediately, before the counter is read.
    pub fn arm(&self) {
        self.0.store(MAX_URGENT_RTR_ADVERTISEMENTS as i32 - 1, Ordering::SeqCst);
    }

    /// Fetch-and-decrement, floored at zero. True if an urgent send was pending.
    pub fn take(&self) -> bool {
        let prev = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)))
            .unwrap_or(0);
        prev > 0
    }
}

/// How long to wait before the next multicast RA.
///
/// The urgent counter is only consumed when there is something to send.
pub fn next_multicast_delay<R: Rng>(
    has_ra: bool,
    deprecating: bool,
    urgent: &UrgentCounter,
    rng: &mut R,
) -> Duration {
    if !has_ra {
        return Duration::from_secs(DAY_IN_SECONDS);
    }

    if urgent.take() || deprecating {
        return Duration::from_secs(MIN_DELAY_BETWEEN_RAS_SEC);
    }

    Duration::from_secs(rng.random_range(MIN_RTR_ADV_INTERVAL_SEC..MAX_RTR_ADV_INTERVAL_SEC))
}

pub(crate) async fn run_multicast_transmitter<T: RaTransport>(shared: Arc<RaShared>, socket: Arc<T>) {
    info!(interface = %shared.iface.name, "RA multicast transmitter started");

    while socket.is_open() {
        let (has_ra, deprecating) = shared.send_state().await;
        let delay = next_multicast_delay(has_ra, deprecating, &shared.urgent, &mut rand::rng());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.wake.notified() => {
                debug!(interface = %shared.iface.name, "RA transmitter woken early");
            }
        }

        shared.send_ra(socket.as_ref(), shared.all_nodes).await;
        shared.age_deprecations().await;
    }

    info!(interface = %shared.iface.name, "RA multicast transmitter stopped");
}
