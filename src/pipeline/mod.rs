//! Producer/consumer pipeline.
//!
//! The capture thread persists the packets it wants to keep and offers them
//! to a bounded [`Relay`]. A pool of worker threads takes from the relay,
//! runs a per-worker [`PacketHandler`], and recycles each packet.
//!
//! ```text
//! capture thread (engine callback)
//!   |
//!   |-- persist_to(pool) → OwnedPacket
//!   |
//!   +--[relay: bounded crossbeam channel]--→ Worker 0  (handler, recycle)
//!                                        +--→ Worker 1
//!                                        ...
//!                                        +--→ Worker N-1
//! ```
//!
//! Shutdown clears the shared running flag, joins the workers, then drains
//! whatever is still queued so no pool slot is left outstanding.

pub mod relay;
pub mod worker;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub use relay::{Relay, RelayStats};
pub use worker::PacketHandler;

use worker::Worker;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker threads (0 = auto-detect from CPU count).
    pub workers: usize,
    /// How long a worker waits on the relay before re-checking the running
    /// flag.
    pub take_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            workers: 0,
            take_timeout: Duration::from_millis(50),
        }
    }
}

impl WorkerConfig {
    /// The worker count after resolving 0 to a CPU-based default.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            // Half the available cores, minimum 1, maximum 8.
            (num_cpus::get() / 2).clamp(1, 8)
        } else {
            self.workers
        }
    }
}

/// What [`WorkerPool::shutdown`] hands back.
#[derive(Debug)]
pub struct Shutdown<H> {
    /// Packets the workers handled.
    pub processed: u64,
    /// Packets still queued at shutdown and recycled without handling.
    pub drained: usize,
    /// Each worker's handler, in worker order, for reading final state.
    pub handlers: Vec<H>,
}

/// Running worker threads.
pub struct WorkerPool<H> {
    relay: Relay,
    running: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<Worker<H>>>,
}

/// Spawn worker threads consuming from `relay`.
///
/// `make_handler` is called once per worker with the worker index. Workers
/// run until `running` is cleared, either by the caller or by
/// [`WorkerPool::shutdown`].
pub fn spawn<H, M>(
    relay: Relay,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    make_handler: M,
) -> io::Result<WorkerPool<H>>
where
    H: PacketHandler + 'static,
    M: Fn(usize) -> H,
{
    let workers = config.resolved_workers();
    tracing::info!(workers, relay_capacity = relay.capacity(), "starting worker pool");

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let worker_relay = relay.clone();
        let worker_running = running.clone();
        let handler = make_handler(id);
        let take_timeout = config.take_timeout;

        let spawned = thread::Builder::new()
            .name(format!("pktscope-worker-{}", id))
            .spawn(move || {
                let mut worker = Worker::new(id, handler);
                worker.run(&worker_relay, &worker_running, take_timeout);
                worker
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                // Stop the workers already started before reporting.
                running.store(false, Ordering::Relaxed);
                for handle in handles {
                    let _ = handle.join();
                }
                relay.drain();
                return Err(err);
            }
        }
    }

    Ok(WorkerPool {
        relay,
        running,
        handles,
    })
}

impl<H> WorkerPool<H> {
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Stop the workers, join them and recycle anything left in the relay.
    pub fn shutdown(self) -> Shutdown<H> {
        self.running.store(false, Ordering::Relaxed);

        let mut processed = 0;
        let mut handlers = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.join() {
                Ok(worker) => {
                    processed += worker.processed;
                    handlers.push(worker.handler);
                }
                Err(_) => tracing::warn!("worker thread panicked"),
            }
        }

        let drained = self.relay.drain();
        if drained > 0 {
            tracing::warn!(drained, "packets left in relay at shutdown were recycled unprocessed");
        }
        tracing::debug!(processed, drained, "worker pool shut down");

        Shutdown {
            processed,
            drained,
            handlers,
        }
    }
}
