//! End-to-end scenarios: engine delivery, scoped memory reuse, pooled
//! persistence and the relay/worker handoff.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use pktscope::capture::{
    Batch, CaptureEngine, CaptureSource, EngineConfig, Limit, ReplaySource, StopReason,
    POISON_BYTE,
};
use pktscope::error::{PoolError, SourceError};
use pktscope::packet::{OwnedPacket, PacketData};
use pktscope::pipeline::{self, Relay, WorkerConfig};
use pktscope::pool::{BufferPool, SizePolicy};
use pktscope::protocol::{Ip4View, TcpView, UdpView};

const SYN: u8 = 0x02;
const ACK: u8 = 0x10;

fn ipv4_frame(proto: u8, l4: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 34];
    frame[0..6].copy_from_slice(&[0xff; 6]);
    frame[6..12].copy_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    frame[12..14].copy_from_slice(&[0x08, 0x00]);
    let ip = &mut frame[14..34];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + l4.len()) as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&[192, 168, 1, 100]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 1]);
    frame.extend_from_slice(l4);
    frame
}

fn tcp_frame(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[12] = 0x50;
    tcp[13] = flags;
    ipv4_frame(6, &tcp)
}

fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    udp.extend_from_slice(payload);
    ipv4_frame(17, &udp)
}

fn replay(frames: Vec<Vec<u8>>, per_batch: usize) -> CaptureEngine<ReplaySource> {
    let source = ReplaySource::new(frames).with_batch_limit(per_batch);
    CaptureEngine::new(source, EngineConfig::default())
}

#[test]
fn loop_of_ten_over_ten_frames() {
    let frames = (0..10).map(|i| tcp_frame(1000 + i, 80, ACK)).collect();
    let mut engine = replay(frames, 4);
    let mut calls = 0;
    let outcome = engine
        .loop_packets(Limit::Packets(10), |_| calls += 1)
        .unwrap();
    assert_eq!(calls, 10);
    assert_eq!(outcome.delivered, 10);
    assert_eq!(outcome.reason, StopReason::CountReached);
}

#[test]
fn loop_of_ten_over_five_frames_returns_on_exhaustion() {
    let frames = (0..5).map(|i| tcp_frame(1000 + i, 80, ACK)).collect();
    let mut engine = replay(frames, 4);
    let mut calls = 0;
    let outcome = engine
        .loop_packets(Limit::Packets(10), |_| calls += 1)
        .unwrap();
    assert_eq!(calls, 5);
    assert_eq!(outcome.reason, StopReason::Exhausted);
}

#[test]
fn tcp_view_matches_test_vector_and_rejects_udp() {
    let frames = vec![tcp_frame(49152, 80, SYN), udp_frame(5353, 53, b"query")];
    let mut engine = replay(frames, 8);
    let mut tcp = TcpView::new();
    let mut udp = UdpView::new();
    let mut results = Vec::new();

    engine
        .loop_packets(Limit::Unbounded, |packet| {
            let ports = if packet.has_header(&mut tcp) {
                let hdr = tcp.header(packet).unwrap();
                Some((hdr.src_port(), hdr.dst_port()))
            } else {
                assert!(!tcp.is_bound());
                assert!(tcp.header(packet).is_err());
                None
            };
            results.push((ports, packet.has_header(&mut udp)));
        })
        .unwrap();

    assert_eq!(results, vec![(Some((49152, 80)), false), (None, true)]);
}

/// Source that inspects the engine's buffer before every refill and records
/// whether bytes from earlier deliveries are still readable.
struct CanarySource {
    inner: ReplaySource,
    fills: usize,
    stale_bytes: usize,
    poisoned_bytes: usize,
}

impl CaptureSource for CanarySource {
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        max: usize,
        timeout: Duration,
    ) -> Result<usize, SourceError> {
        if self.fills > 0 {
            for &b in batch.residue() {
                if b == POISON_BYTE {
                    self.poisoned_bytes += 1;
                } else {
                    self.stale_bytes += 1;
                }
            }
        }
        self.fills += 1;
        self.inner.next_batch(batch, max, timeout)
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }
}

fn canary_run(poison: bool) -> CanarySource {
    let frames: Vec<Vec<u8>> = (0..6).map(|i| tcp_frame(2000 + i, 443, ACK)).collect();
    let source = CanarySource {
        inner: ReplaySource::new(frames).with_batch_limit(2),
        fills: 0,
        stale_bytes: 0,
        poisoned_bytes: 0,
    };
    let config = EngineConfig {
        poison_released: poison,
        ..EngineConfig::default()
    };
    let mut engine = CaptureEngine::new(source, config);
    let mut ports = Vec::new();
    engine
        .loop_packets(Limit::Unbounded, |packet| {
            let data = packet.data();
            ports.push(u16::from_be_bytes([data[34], data[35]]));
        })
        .unwrap();
    assert_eq!(ports, (2000..2006).collect::<Vec<_>>());
    engine.into_source()
}

#[test]
fn released_scoped_memory_is_poisoned() {
    let source = canary_run(true);
    assert_eq!(source.fills, 4);
    assert!(source.poisoned_bytes > 0);
    assert_eq!(source.stale_bytes, 0);
}

#[test]
fn without_poison_buffer_is_reused_as_is() {
    let source = canary_run(false);
    assert!(source.stale_bytes > 0);
    assert_eq!(source.poisoned_bytes, 0);
}

/// Live-style source that never has traffic: every fill times out.
struct IdleSource;

impl CaptureSource for IdleSource {
    fn next_batch(
        &mut self,
        _batch: &mut Batch,
        _max: usize,
        timeout: Duration,
    ) -> Result<usize, SourceError> {
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(0)
    }

    fn is_exhausted(&self) -> bool {
        false
    }
}

#[test]
fn interrupt_from_another_thread_stops_idle_loop() {
    let mut engine = CaptureEngine::new(IdleSource, EngineConfig::default());
    let interrupt = engine.interrupt_handle();
    let raiser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        interrupt.interrupt();
    });

    let mut calls = 0;
    let outcome = engine
        .loop_packets(Limit::Unbounded, |_| calls += 1)
        .unwrap();
    raiser.join().unwrap();

    assert_eq!(outcome.reason, StopReason::Interrupted);
    assert_eq!(outcome.delivered, 0);
    assert_eq!(calls, 0);
    assert!(engine.stats().timeouts > 0);
    // The flag is consumed, so the engine can run again.
    assert!(!engine.interrupt_handle().is_interrupted());
}

#[test]
fn copies_outlive_the_batch_buffer() {
    let frames: Vec<Vec<u8>> = (0..4).map(|i| tcp_frame(3000 + i, 22, ACK)).collect();
    let expected = frames.clone();
    let mut engine = replay(frames, 1);
    let pool = BufferPool::fixed(2, 128, false);

    let mut kept: Vec<OwnedPacket> = Vec::new();
    engine
        .loop_packets(Limit::Unbounded, |packet| {
            kept.push(match packet.frame_no() % 2 {
                0 => packet.persist_to(&pool).unwrap(),
                _ => packet.copy(),
            });
        })
        .unwrap();

    for (owned, original) in kept.iter().zip(&expected) {
        assert_eq!(owned.data(), &original[..]);
    }
    assert_eq!(pool.outstanding(), 2);
    kept.into_iter().for_each(OwnedPacket::recycle);
    assert_eq!(pool.available(), 2);
    pool.close().unwrap();
}

#[test]
fn pool_exhaustion_after_capacity_acquires() {
    let pool = BufferPool::new(3, SizePolicy::Buckets(vec![256, 1536]), false);
    let small: Vec<_> = (0..2).map(|_| pool.acquire(100).unwrap()).collect();
    let large = pool.acquire(1000).unwrap();
    assert_eq!(large.capacity(), 1536);
    // Capacity is one budget: the fourth acquire fails whichever class it maps to.
    assert!(matches!(
        pool.acquire(1),
        Err(PoolError::Exhausted { requested: 1 })
    ));
    assert!(matches!(pool.acquire(1000), Err(PoolError::Exhausted { .. })));

    assert_eq!(pool.close(), Err(PoolError::Outstanding { count: 3 }));
    drop(small);
    drop(large);
    pool.close().unwrap();
    assert_eq!(pool.close(), Err(PoolError::Closed));
}

#[test]
fn relay_backpressure_recycles_rejected_packet() {
    let frames: Vec<Vec<u8>> = (0..5).map(|i| tcp_frame(4000 + i, 80, ACK)).collect();
    let mut engine = replay(frames, 8);
    let pool = BufferPool::fixed(8, 256, true);
    let relay = Relay::new(3);
    let mut accepted = Vec::new();
    let mut available_before_put = Vec::new();
    let mut available_after_put = Vec::new();

    engine
        .loop_packets(Limit::Unbounded, |packet| {
            available_before_put.push(pool.available());
            let owned = packet.persist_to(&pool).unwrap();
            accepted.push(relay.try_put(owned));
            available_after_put.push(pool.available());
        })
        .unwrap();

    assert_eq!(accepted, vec![true, true, true, false, false]);
    assert_eq!(available_after_put[3], available_before_put[3]);
    assert_eq!(available_after_put[4], available_before_put[4]);
    assert_eq!(relay.stats().dropped, 2);
    assert_eq!(pool.outstanding(), 3);
    assert_eq!(relay.drain(), 3);
    assert_eq!(pool.outstanding(), 0);
}

#[derive(Default)]
struct SynCounter {
    tcp: TcpView,
    syns: u64,
    seen: u64,
}

impl pipeline::PacketHandler for SynCounter {
    fn handle(&mut self, packet: &OwnedPacket) {
        self.seen += 1;
        if packet.has_header(&mut self.tcp) {
            if let Ok(hdr) = self.tcp.header(packet) {
                if hdr.syn() && !hdr.ack() {
                    self.syns += 1;
                }
            }
        }
    }
}

#[test]
fn producer_consumer_end_to_end() {
    let mut frames = Vec::new();
    for i in 0..60u16 {
        frames.push(match i % 3 {
            0 => tcp_frame(10_000 + i, 80, SYN),
            1 => tcp_frame(10_000 + i, 80, SYN | ACK),
            _ => udp_frame(10_000 + i, 53, b"dns"),
        });
    }
    let mut engine = replay(frames, 16);
    let pool = BufferPool::fixed(64, 128, true);
    let relay = Relay::new(64);
    let running = Arc::new(AtomicBool::new(true));
    let config = WorkerConfig {
        workers: 2,
        take_timeout: Duration::from_millis(5),
    };
    let workers = pipeline::spawn(relay.clone(), config, running, |_| SynCounter::default()).unwrap();

    let mut ip4 = Ip4View::new();
    let mut tcp = TcpView::new();
    let mut persisted = 0;
    let outcome = engine
        .loop_packets(Limit::Unbounded, |packet| {
            if packet.has_header(&mut ip4) && packet.has_header(&mut tcp) {
                let owned = packet.persist_to(&pool).unwrap();
                assert!(relay.try_put(owned));
                persisted += 1;
            }
        })
        .unwrap();
    assert_eq!(outcome.delivered, 60);
    assert_eq!(persisted, 40);

    while !relay.is_empty() {
        std::thread::sleep(Duration::from_millis(1));
    }
    let report = workers.shutdown();

    assert_eq!(report.processed, 40);
    assert_eq!(report.drained, 0);
    assert_eq!(report.handlers.iter().map(|h| h.seen).sum::<u64>(), 40);
    assert_eq!(report.handlers.iter().map(|h| h.syns).sum::<u64>(), 20);
    assert_eq!(pool.outstanding(), 0);
    pool.close().unwrap();
}

#[test]
fn shutdown_recycles_queued_packets() {
    let pool = BufferPool::fixed(4, 128, true);
    let relay = Relay::new(4);
    let running = Arc::new(AtomicBool::new(false));
    // Workers see the cleared flag and exit without taking anything.
    let workers = pipeline::spawn(
        relay.clone(),
        WorkerConfig {
            workers: 1,
            take_timeout: Duration::from_millis(1),
        },
        running,
        |_| |_: &OwnedPacket| {},
    )
    .unwrap();

    let mut engine = replay(vec![udp_frame(1, 2, b"x"); 4], 4);
    engine
        .loop_packets(Limit::Unbounded, |packet| {
            assert!(relay.try_put(packet.persist_to(&pool).unwrap()));
        })
        .unwrap();
    assert_eq!(pool.available(), 0);

    let report = workers.shutdown();
    assert_eq!(report.processed, 0);
    assert_eq!(report.drained, 4);
    assert_eq!(pool.available(), 4);
}
