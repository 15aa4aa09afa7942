//! Error types shared across the crate.
//!
//! Exhaustion and timeouts are ordinary outcomes and show up as values the
//! caller matches on. The variants here that describe misuse (`DoubleRelease`,
//! `ForeignSlot`, `Unbound`) are defects in the calling code and should not be
//! retried.

use thiserror::Error;

use crate::protocol::ProtocolId;

/// Errors from [`crate::pool::BufferPool`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No free slot large enough for the request.
    #[error("pool exhausted: no free slot of at least {requested} bytes")]
    Exhausted { requested: usize },
    /// The slot index is already on the free list.
    #[error("slot {index} released twice")]
    DoubleRelease { index: usize },
    /// The slot belongs to a different pool.
    #[error("slot does not belong to this pool")]
    ForeignSlot,
    /// `close()` was called while slots were still checked out.
    #[error("pool closed with {count} slot(s) still outstanding")]
    Outstanding { count: usize },
    /// The pool was already closed.
    #[error("pool is closed")]
    Closed,
}

/// Errors from reading fields through a [`crate::protocol::HeaderView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewError {
    /// The view has no binding for the packet it was asked to read.
    #[error("{protocol} view is not bound to this packet")]
    Unbound { protocol: ProtocolId },
}

/// Failure reported by a capture source collaborator.
#[derive(Debug, Error)]
#[error("capture source error: {message}")]
pub struct SourceError {
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        SourceError {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SourceError {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors from the capture engine and the pcap-backed source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture source failed; the engine is now stopped.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A previous source error left the engine stopped.
    #[error("capture engine is stopped")]
    Stopped,
    /// Failed to find a suitable network device.
    #[error("no capture device: {0}")]
    NoDevice(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// pcap error.
    #[cfg(feature = "pcap")]
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),
}

/// Errors from loading the TOML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
