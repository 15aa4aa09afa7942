use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Resolution of [`Timestamp::frac`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    #[default]
    Micros,
    Nanos,
}

impl TimestampUnit {
    fn per_second(self) -> u32 {
        match self {
            TimestampUnit::Micros => 1_000_000,
            TimestampUnit::Nanos => 1_000_000_000,
        }
    }
}

/// Capture timestamp: whole seconds plus a sub-second fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub secs: u64,
    pub frac: u32,
    pub unit: TimestampUnit,
}

impl Timestamp {
    pub fn from_micros(secs: u64, micros: u32) -> Self {
        Timestamp {
            secs,
            frac: micros,
            unit: TimestampUnit::Micros,
        }
    }

    pub fn from_nanos(secs: u64, nanos: u32) -> Self {
        Timestamp {
            secs,
            frac: nanos,
            unit: TimestampUnit::Nanos,
        }
    }

    pub fn as_duration(&self) -> Duration {
        let nanos = match self.unit {
            TimestampUnit::Micros => self.frac.saturating_mul(1_000),
            TimestampUnit::Nanos => self.frac,
        };
        Duration::new(self.secs, nanos.min(999_999_999))
    }

    /// Seconds since the epoch as a float, the form reporting code uses.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.frac as f64 / self.unit.per_second() as f64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            TimestampUnit::Micros => write!(f, "{}.{:06}", self.secs, self.frac),
            TimestampUnit::Nanos => write!(f, "{}.{:09}", self.secs, self.frac),
        }
    }
}

/// Per-frame metadata reported by a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    pub timestamp: Timestamp,
    /// Length of the frame on the wire, which may exceed the captured bytes.
    pub wire_len: u32,
}

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Metadata describing one delivered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    pub timestamp: Timestamp,
    pub capture_len: u32,
    pub wire_len: u32,
    /// Engine-assigned sequence number, starting at 1.
    pub frame_no: u64,
    /// Process-wide identity of the delivered frame; copies share it.
    stamp: u64,
}

impl PacketDescriptor {
    pub fn new(meta: FrameMeta, capture_len: usize, frame_no: u64) -> Self {
        PacketDescriptor {
            timestamp: meta.timestamp,
            capture_len: capture_len as u32,
            wire_len: meta.wire_len.max(capture_len as u32),
            frame_no,
            stamp: NEXT_STAMP.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// True when the capture was cut short by the snap length.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.capture_len < self.wire_len
    }

    #[inline]
    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_units() {
        let us = Timestamp::from_micros(10, 250_000);
        let ns = Timestamp::from_nanos(10, 250_000_000);
        assert_eq!(us.as_duration(), ns.as_duration());
        assert_eq!(us.to_string(), "10.250000");
        assert_eq!(ns.to_string(), "10.250000000");
        assert!((us.as_secs_f64() - 10.25).abs() < 1e-9);
    }

    #[test]
    fn descriptors_get_distinct_stamps() {
        let meta = FrameMeta {
            timestamp: Timestamp::default(),
            wire_len: 1500,
        };
        let a = PacketDescriptor::new(meta, 96, 1);
        let b = PacketDescriptor::new(meta, 96, 2);
        assert_ne!(a.stamp(), b.stamp());
        assert!(a.is_truncated());
    }
}
