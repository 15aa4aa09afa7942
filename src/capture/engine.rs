//! The dispatch/loop engine.
//!
//! The engine owns one [`Batch`] allocated up front. Each fill overwrites
//! it, and each frame in it is delivered to the callback as a
//! [`Packet<'_>`] borrowing that buffer. Because the callback is
//! `FnMut(&Packet<'_>)`, the handle cannot be stored anywhere that outlives
//! the call; the next frame is only delivered after the callback returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Batch, CaptureSource};
use crate::error::CaptureError;
use crate::packet::{Packet, PacketDescriptor};

/// Byte written over a frame's memory after its callback returns when
/// [`EngineConfig::poison_released`] is set.
pub const POISON_BYTE: u8 = 0xDB;

/// Engine tuning. Only shapes batch sizes and waits; sources interpret
/// their own options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the batch buffer in bytes.
    pub buffer_size: usize,
    /// How long a fill may wait for the source.
    pub timeout: Duration,
    /// Maximum frames per batch.
    pub max_batch: usize,
    /// Overwrite each frame with [`POISON_BYTE`] once its callback returns.
    pub poison_released: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buffer_size: 4 * 1024 * 1024,
            timeout: Duration::from_millis(100),
            max_batch: 64,
            poison_released: false,
        }
    }
}

/// How many packets a call may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unbounded,
    Packets(u64),
}

impl Limit {
    /// `0` means unbounded, as with a packet count on the command line.
    pub fn from_count(count: u64) -> Self {
        if count == 0 {
            Limit::Unbounded
        } else {
            Limit::Packets(count)
        }
    }

    #[inline]
    fn reached(self, delivered: u64) -> bool {
        match self {
            Limit::Unbounded => false,
            Limit::Packets(n) => delivered >= n,
        }
    }
}

/// Result of a single [`CaptureEngine::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Delivered(usize),
    /// Nothing arrived within the configured timeout.
    TimedOut,
    /// The source has no more frames.
    Exhausted,
    /// The interrupt flag was raised; `delivered` packets went out first.
    Interrupted { delivered: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CountReached,
    Exhausted,
    Interrupted,
}

/// Result of [`CaptureEngine::loop_packets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub delivered: u64,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    /// A source error ended the capture; the engine only accepts `close`.
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub packets: u64,
    pub bytes: u64,
    pub batches: u64,
    pub timeouts: u64,
}

/// Requests that a running `loop_packets`/`dispatch` return early.
///
/// Cloneable and `Send`, so it can be raised from a signal handler or
/// another thread. The flag is checked before every delivery and cleared
/// when the engine reports `Interrupted`.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

enum Fill {
    Ready,
    TimedOut,
    Exhausted,
}

/// Drives a [`CaptureSource`] and delivers scoped packets.
pub struct CaptureEngine<S> {
    source: S,
    config: EngineConfig,
    batch: Batch,
    cursor: usize,
    next_frame_no: u64,
    interrupt: InterruptHandle,
    state: EngineState,
    stats: EngineStats,
}

impl<S: CaptureSource> CaptureEngine<S> {
    pub fn new(source: S, config: EngineConfig) -> Self {
        let batch = Batch::new(config.buffer_size, config.max_batch);
        tracing::debug!(
            buffer_size = config.buffer_size,
            max_batch = config.max_batch,
            timeout_ms = config.timeout.as_millis() as u64,
            poison = config.poison_released,
            "capture engine created"
        );
        CaptureEngine {
            source,
            config,
            batch,
            cursor: 0,
            next_frame_no: 1,
            interrupt: InterruptHandle::default(),
            state: EngineState::Ready,
            stats: EngineStats::default(),
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Frames fetched from the source but not delivered yet.
    pub fn pending(&self) -> usize {
        self.batch.len() - self.cursor
    }

    /// Deliver packets until `limit` is reached, the source is exhausted, or
    /// the interrupt handle is raised. Timeouts are absorbed: the call keeps
    /// waiting on the source.
    pub fn loop_packets<F>(&mut self, limit: Limit, mut callback: F) -> Result<LoopOutcome, CaptureError>
    where
        F: FnMut(&Packet<'_>),
    {
        self.ensure_ready()?;
        let mut delivered = 0u64;
        let reason = loop {
            if limit.reached(delivered) {
                break StopReason::CountReached;
            }
            if self.interrupt.take() {
                break StopReason::Interrupted;
            }
            if self.pending() == 0 {
                match self.fill()? {
                    Fill::Ready => {}
                    Fill::TimedOut => continue,
                    Fill::Exhausted => break StopReason::Exhausted,
                }
            }
            self.deliver_next(&mut callback);
            delivered += 1;
        };
        tracing::debug!(delivered, reason = ?reason, "loop finished");
        Ok(LoopOutcome { delivered, reason })
    }

    /// Deliver at most one batch, bounded by `limit`.
    ///
    /// Frames left over from an earlier call are delivered before the
    /// source is asked for more.
    pub fn dispatch<F>(&mut self, limit: Limit, mut callback: F) -> Result<Dispatched, CaptureError>
    where
        F: FnMut(&Packet<'_>),
    {
        self.ensure_ready()?;
        if self.pending() == 0 {
            if self.interrupt.take() {
                return Ok(Dispatched::Interrupted { delivered: 0 });
            }
            match self.fill()? {
                Fill::Ready => {}
                Fill::TimedOut => return Ok(Dispatched::TimedOut),
                Fill::Exhausted => return Ok(Dispatched::Exhausted),
            }
        }

        let mut delivered = 0usize;
        while self.pending() > 0 && !limit.reached(delivered as u64) {
            if self.interrupt.take() {
                return Ok(Dispatched::Interrupted { delivered });
            }
            self.deliver_next(&mut callback);
            delivered += 1;
        }
        Ok(Dispatched::Delivered(delivered))
    }

    /// Release the engine, returning the source to the caller.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Shut the engine down. Valid in any state.
    pub fn close(self) -> EngineStats {
        if self.pending() > 0 {
            tracing::debug!(discarded = self.pending(), "closing with undelivered frames");
        }
        tracing::info!(
            packets = self.stats.packets,
            bytes = self.stats.bytes,
            batches = self.stats.batches,
            "capture engine closed"
        );
        self.stats
    }

    fn ensure_ready(&self) -> Result<(), CaptureError> {
        match self.state {
            EngineState::Ready => Ok(()),
            EngineState::Stopped => Err(CaptureError::Stopped),
        }
    }

    fn fill(&mut self) -> Result<Fill, CaptureError> {
        self.batch.clear();
        self.cursor = 0;
        let max = self.batch.max_frames();
        match self
            .source
            .next_batch(&mut self.batch, max, self.config.timeout)
        {
            Ok(_) if !self.batch.is_empty() => {
                self.stats.batches += 1;
                tracing::trace!(frames = self.batch.len(), "batch filled");
                Ok(Fill::Ready)
            }
            Ok(_) if self.source.is_exhausted() => Ok(Fill::Exhausted),
            Ok(_) => {
                self.stats.timeouts += 1;
                Ok(Fill::TimedOut)
            }
            Err(err) => {
                self.state = EngineState::Stopped;
                tracing::warn!(error = %err, "capture source failed, engine stopped");
                Err(CaptureError::Source(err))
            }
        }
    }

    fn deliver_next<F>(&mut self, callback: &mut F)
    where
        F: FnMut(&Packet<'_>),
    {
        let index = self.cursor;
        let (meta, data) = self.batch.frame(index);
        let len = data.len();
        let descriptor = PacketDescriptor::new(meta, len, self.next_frame_no);
        {
            let packet = Packet::new(descriptor, data);
            callback(&packet);
        }
        if self.config.poison_released {
            self.batch.poison(index, POISON_BYTE);
        }
        tracing::trace!(frame = self.next_frame_no, len, "packet delivered");

        self.cursor += 1;
        self.next_frame_no += 1;
        self.stats.packets += 1;
        self.stats.bytes += len as u64;
    }
}

impl<S> std::fmt::Debug for CaptureEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("state", &self.state)
            .field("pending", &(self.batch.len() - self.cursor))
            .field("stats", &self.stats)
            .finish()
    }
}
