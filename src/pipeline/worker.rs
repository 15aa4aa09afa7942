//! Consumer loop run by each worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::relay::Relay;
use crate::packet::OwnedPacket;

/// Per-worker packet processing.
///
/// Each worker owns its handler, so handlers can keep their own header views
/// and counters without synchronization.
pub trait PacketHandler: Send {
    fn handle(&mut self, packet: &OwnedPacket);
}

impl<F> PacketHandler for F
where
    F: FnMut(&OwnedPacket) + Send,
{
    fn handle(&mut self, packet: &OwnedPacket) {
        self(packet)
    }
}

pub(super) struct Worker<H> {
    pub(super) id: usize,
    pub(super) handler: H,
    pub(super) processed: u64,
}

impl<H: PacketHandler> Worker<H> {
    pub(super) fn new(id: usize, handler: H) -> Self {
        Worker {
            id,
            handler,
            processed: 0,
        }
    }

    /// Take packets until `running` is cleared. Every packet taken is
    /// recycled after the handler sees it.
    pub(super) fn run(&mut self, relay: &Relay, running: &AtomicBool, take_timeout: Duration) {
        while running.load(Ordering::Relaxed) {
            // Bounded wait so the running flag is re-checked during lulls.
            let Some(packet) = relay.take(take_timeout) else {
                continue;
            };
            self.handler.handle(&packet);
            packet.recycle();
            self.processed += 1;
        }
        tracing::debug!(worker = self.id, processed = self.processed, "worker shut down");
    }
}
