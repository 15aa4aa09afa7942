//! Packet handles and their lifetime rules.
//!
//! A [`Packet<'a>`] is what a capture callback receives. It borrows the
//! engine's batch buffer, so the compiler rejects any attempt to keep it after
//! the callback returns:
//!
//! ```compile_fail
//! use pktscope::capture::{CaptureEngine, EngineConfig, Limit, ReplaySource};
//! use pktscope::packet::Packet;
//!
//! let source = ReplaySource::new(vec![vec![0u8; 64]]);
//! let mut engine = CaptureEngine::new(source, EngineConfig::default());
//! let mut kept: Option<&Packet<'_>> = None;
//! engine.loop_packets(Limit::Unbounded, |packet| kept = Some(packet)).unwrap();
//! ```
//!
//! To keep a packet, promote it to an [`OwnedPacket`] with
//! [`Packet::persist`] (heap copy) or [`Packet::persist_to`] (pool slot).
//! Owned packets are `Send` and live until recycled or dropped; a pooled one
//! returns its slot either way.

mod descriptor;

pub use descriptor::{FrameMeta, PacketDescriptor, Timestamp, TimestampUnit};

use std::fmt;
use std::marker::PhantomData;

use crate::error::PoolError;
use crate::pool::{BufferPool, Slot};
use crate::protocol::{self, HeaderView, Layer, LayerTable};

/// Read access shared by scoped and owned packets.
pub trait PacketData {
    fn descriptor(&self) -> &PacketDescriptor;

    /// The captured bytes.
    fn data(&self) -> &[u8];

    /// Layers located when the packet was delivered.
    fn layers(&self) -> &LayerTable;

    #[inline]
    fn capture_len(&self) -> usize {
        self.descriptor().capture_len as usize
    }

    #[inline]
    fn wire_len(&self) -> usize {
        self.descriptor().wire_len as usize
    }

    #[inline]
    fn frame_no(&self) -> u64 {
        self.descriptor().frame_no
    }

    /// Bind `view` to its layer in this packet, or unbind it.
    #[inline]
    fn has_header<L: Layer>(&self, view: &mut HeaderView<L>) -> bool
    where
        Self: Sized,
    {
        view.probe(self)
    }

    /// Independent heap copy, regardless of how this packet is held.
    fn copy(&self) -> OwnedPacket
    where
        Self: Sized,
    {
        OwnedPacket {
            descriptor: *self.descriptor(),
            layers: *self.layers(),
            backing: Backing::Heap(self.data().into()),
        }
    }
}

/// A packet valid only for the duration of the callback that received it.
pub struct Packet<'a> {
    descriptor: PacketDescriptor,
    data: &'a [u8],
    layers: LayerTable,
    // Scoped packets stay on the capture thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> Packet<'a> {
    /// Wrap `data` and locate its layers.
    pub fn new(descriptor: PacketDescriptor, data: &'a [u8]) -> Self {
        Packet {
            descriptor,
            data,
            layers: protocol::dissect(data),
            _not_send: PhantomData,
        }
    }

    /// Copy into freshly allocated memory.
    pub fn persist(&self) -> OwnedPacket {
        self.copy()
    }

    /// Copy into a slot from `pool`.
    ///
    /// Fails with [`PoolError::Exhausted`] when the pool has no slot large
    /// enough; this packet is unaffected either way.
    pub fn persist_to(&self, pool: &BufferPool) -> Result<OwnedPacket, PoolError> {
        let mut slot = pool.acquire(self.data.len())?;
        slot.fill_from(self.data);
        Ok(OwnedPacket {
            descriptor: self.descriptor,
            layers: self.layers,
            backing: Backing::Pooled(slot),
        })
    }
}

impl PacketData for Packet<'_> {
    #[inline]
    fn descriptor(&self) -> &PacketDescriptor {
        &self.descriptor
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }

    #[inline]
    fn layers(&self) -> &LayerTable {
        &self.layers
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("frame_no", &self.descriptor.frame_no)
            .field("capture_len", &self.descriptor.capture_len)
            .field("layers", &self.layers)
            .finish()
    }
}

enum Backing {
    Heap(Box<[u8]>),
    Pooled(Slot),
}

/// A packet with its own memory, independent of any callback.
pub struct OwnedPacket {
    descriptor: PacketDescriptor,
    layers: LayerTable,
    backing: Backing,
}

impl OwnedPacket {
    /// Already owned: returns `self` without copying.
    #[inline]
    pub fn persist(self) -> OwnedPacket {
        self
    }

    /// Release the packet's memory. A pooled packet hands its slot back to
    /// the pool; a heap packet is simply freed.
    ///
    /// Takes `self`, so a packet cannot be recycled twice.
    pub fn recycle(self) {
        if let Backing::Pooled(slot) = &self.backing {
            tracing::trace!(frame = self.descriptor.frame_no, slot = slot.index(), "recycling pooled packet");
        }
        drop(self);
    }

    /// True when the bytes live in a pool slot.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        matches!(self.backing, Backing::Pooled(_))
    }
}

impl PacketData for OwnedPacket {
    #[inline]
    fn descriptor(&self) -> &PacketDescriptor {
        &self.descriptor
    }

    #[inline]
    fn data(&self) -> &[u8] {
        match &self.backing {
            Backing::Heap(bytes) => bytes,
            Backing::Pooled(slot) => slot.as_slice(),
        }
    }

    #[inline]
    fn layers(&self) -> &LayerTable {
        &self.layers
    }
}

impl fmt::Debug for OwnedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedPacket")
            .field("frame_no", &self.descriptor.frame_no)
            .field("capture_len", &self.descriptor.capture_len)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
