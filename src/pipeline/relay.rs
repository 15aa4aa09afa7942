//! Bounded cross-thread handoff of owned packets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::packet::OwnedPacket;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
}

/// Counters reported by [`Relay::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: u64,
    /// Packets rejected by `try_put` because the queue was full.
    pub dropped: u64,
    /// Packets recycled by `drain` instead of being consumed.
    pub drained: u64,
}

/// A bounded queue of [`OwnedPacket`]s shared by a producer and any number
/// of consumers.
///
/// Only owned packets can be queued; a scoped packet has to be persisted
/// first. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct Relay {
    tx: Sender<OwnedPacket>,
    rx: Receiver<OwnedPacket>,
    counters: Arc<Counters>,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "relay capacity must be non-zero");
        let (tx, rx) = bounded(capacity);
        Relay {
            tx,
            rx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Queue `packet` without blocking. When the queue is full the packet is
    /// recycled on the spot, the drop is counted and `false` is returned.
    pub fn try_put(&self, packet: OwnedPacket) -> bool {
        match self.try_send(packet) {
            Ok(()) => true,
            Err(rejected) => {
                rejected.recycle();
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("relay full, packet dropped");
                false
            }
        }
    }

    /// Queue `packet` without blocking, handing it back when the queue is
    /// full so the caller can apply its own policy.
    pub fn try_send(&self, packet: OwnedPacket) -> Result<(), OwnedPacket> {
        match self.tx.try_send(packet) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(p)) | Err(TrySendError::Disconnected(p)) => Err(p),
        }
    }

    /// Wait up to `timeout` for a packet. `None` means the wait timed out.
    pub fn take(&self, timeout: Duration) -> Option<OwnedPacket> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Recycle everything still queued. Returns how many packets were
    /// released.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while let Ok(packet) = self.rx.try_recv() {
            packet.recycle();
            n += 1;
        }
        if n > 0 {
            self.counters.drained.fetch_add(n as u64, Ordering::Relaxed);
            tracing::debug!(drained = n, "relay drained");
        }
        n
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
        }
    }
}
