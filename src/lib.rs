//! pktscope: packet memory lifecycle and capture dispatch.
//!
//! A [`capture::CaptureEngine`] pulls frames from a
//! [`capture::CaptureSource`] and hands each one to a callback as a scoped
//! [`packet::Packet`] that borrows the engine's buffer. Callbacks inspect
//! layers through reusable [`protocol::HeaderView`]s and promote the packets
//! they want to keep into [`packet::OwnedPacket`]s, either on the heap or in
//! a [`pool::BufferPool`] slot. Owned packets cross to worker threads through
//! a bounded [`pipeline::Relay`].
//!
//! ```
//! use pktscope::capture::{CaptureEngine, EngineConfig, Limit, ReplaySource};
//! use pktscope::pipeline::Relay;
//! use pktscope::pool::BufferPool;
//!
//! let source = ReplaySource::new(vec![vec![0u8; 64]; 8]);
//! let mut engine = CaptureEngine::new(source, EngineConfig::default());
//! let pool = BufferPool::fixed(4, 128, true);
//! let relay = Relay::new(4);
//!
//! let outcome = engine
//!     .loop_packets(Limit::Unbounded, |packet| {
//!         if let Ok(owned) = packet.persist_to(&pool) {
//!             relay.try_put(owned);
//!         }
//!     })
//!     .unwrap();
//!
//! assert_eq!(outcome.delivered, 8);
//! assert_eq!(relay.len(), 4);
//! assert_eq!(relay.drain(), 4);
//! assert_eq!(pool.available(), 4);
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod packet;
pub mod pipeline;
pub mod pool;
pub mod protocol;

pub use capture::{CaptureEngine, CaptureSource, Limit};
pub use error::{CaptureError, ConfigError, PoolError, SourceError, ViewError};
pub use packet::{OwnedPacket, Packet, PacketData};
pub use pipeline::Relay;
pub use pool::BufferPool;
