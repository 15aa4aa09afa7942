//! Capture sources and the dispatch engine that drives them.
//!
//! A [`CaptureSource`] fills a [`Batch`] with frames; the
//! [`CaptureEngine`] hands each frame to a callback as a scoped
//! [`crate::packet::Packet`] borrowing the batch buffer. Sources are driven
//! from a single thread: every call takes `&mut self`.

pub mod engine;
mod replay;

#[cfg(feature = "pcap")]
mod pcap_source;

pub use crate::packet::FrameMeta;
pub use engine::{
    CaptureEngine, Dispatched, EngineConfig, EngineState, EngineStats, InterruptHandle, Limit,
    LoopOutcome, StopReason, POISON_BYTE,
};
pub use replay::ReplaySource;

#[cfg(feature = "pcap")]
pub use pcap_source::{list_interfaces, CaptureConfig, PcapSource};

use std::time::Duration;

use crate::error::SourceError;

/// Producer of captured frames.
pub trait CaptureSource {
    /// Append up to `max` frames to `batch`, waiting at most `timeout` for
    /// the first one. Returns the number of frames added; `Ok(0)` means the
    /// wait expired, or that the source is exhausted if
    /// [`CaptureSource::is_exhausted`] now reports true.
    ///
    /// A source must not consume a frame it cannot append: when
    /// [`Batch::push`] returns false the frame should be kept for the next
    /// call.
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        max: usize,
        timeout: Duration,
    ) -> Result<usize, SourceError>;

    /// True once a finite source has handed out its last frame.
    fn is_exhausted(&self) -> bool;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        max: usize,
        timeout: Duration,
    ) -> Result<usize, SourceError> {
        (**self).next_batch(batch, max, timeout)
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameRecord {
    meta: FrameMeta,
    offset: usize,
    len: usize,
}

/// The engine's per-call capture buffer.
///
/// Frames are copied back to back into one fixed allocation made when the
/// engine is created. The buffer is reused for every batch, so the bytes of
/// a delivered packet are overwritten by the next fill.
pub struct Batch {
    buf: Box<[u8]>,
    used: usize,
    high_water: usize,
    frames: Vec<FrameRecord>,
    max_frames: usize,
}

impl Batch {
    pub fn new(buffer_size: usize, max_frames: usize) -> Self {
        assert!(buffer_size > 0, "batch buffer must be non-empty");
        assert!(max_frames > 0, "batch must hold at least one frame");
        Batch {
            buf: vec![0u8; buffer_size].into_boxed_slice(),
            used: 0,
            high_water: 0,
            frames: Vec::with_capacity(max_frames),
            max_frames,
        }
    }

    /// Append a frame. Returns false, leaving the batch unchanged, when the
    /// frame limit is reached or the bytes do not fit in the remaining room.
    ///
    /// The first frame of a batch always fits: if it is larger than the
    /// whole buffer it is truncated, and `meta.wire_len` keeps the original
    /// length.
    pub fn push(&mut self, meta: FrameMeta, data: &[u8]) -> bool {
        if self.frames.len() >= self.max_frames {
            return false;
        }
        let room = self.remaining();
        let len = if data.len() <= room {
            data.len()
        } else if self.frames.is_empty() {
            room
        } else {
            return false;
        };

        let offset = self.used;
        self.buf[offset..offset + len].copy_from_slice(&data[..len]);
        self.frames.push(FrameRecord {
            meta: FrameMeta {
                wire_len: meta.wire_len.max(data.len() as u32),
                ..meta
            },
            offset,
            len,
        });
        self.used += len;
        self.high_water = self.high_water.max(self.used);
        true
    }

    /// Bytes still free in the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.max_frames
    }

    /// Buffer contents left over from earlier batches, up to the furthest
    /// byte ever written. Meant for sources that instrument buffer reuse.
    pub fn residue(&self) -> &[u8] {
        &self.buf[..self.high_water]
    }

    pub(crate) fn clear(&mut self) {
        self.used = 0;
        self.frames.clear();
    }

    pub(crate) fn frame(&self, index: usize) -> (FrameMeta, &[u8]) {
        let rec = self.frames[index];
        (rec.meta, &self.buf[rec.offset..rec.offset + rec.len])
    }

    pub(crate) fn poison(&mut self, index: usize, byte: u8) {
        let rec = self.frames[index];
        self.buf[rec.offset..rec.offset + rec.len].fill(byte);
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("frames", &self.frames.len())
            .field("used", &self.used)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(len: usize) -> FrameMeta {
        FrameMeta {
            wire_len: len as u32,
            ..FrameMeta::default()
        }
    }

    #[test]
    fn frames_are_packed_back_to_back() {
        let mut batch = Batch::new(16, 4);
        assert!(batch.push(meta(4), &[1, 2, 3, 4]));
        assert!(batch.push(meta(3), &[5, 6, 7]));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.remaining(), 9);
        assert_eq!(batch.frame(1).1, &[5, 6, 7]);
        assert_eq!(batch.residue(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn push_refuses_when_full() {
        let mut batch = Batch::new(8, 2);
        assert!(batch.push(meta(6), &[0; 6]));
        assert!(!batch.push(meta(4), &[0; 4]));
        assert!(batch.push(meta(2), &[0; 2]));
        assert!(batch.is_full());
        assert!(!batch.push(meta(0), &[]));
    }

    #[test]
    fn oversized_first_frame_is_truncated() {
        let mut batch = Batch::new(4, 2);
        assert!(batch.push(meta(10), &[9; 10]));
        let (m, data) = batch.frame(0);
        assert_eq!(data.len(), 4);
        assert_eq!(m.wire_len, 10);
    }

    #[test]
    fn clear_keeps_residue() {
        let mut batch = Batch::new(8, 2);
        batch.push(meta(3), &[7, 7, 7]);
        batch.poison(0, 0xAA);
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.remaining(), 8);
        assert_eq!(batch.residue(), &[0xAA; 3]);
    }
}
