mod cli;

use clap::Parser;
use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use pktscope::capture::{self, CaptureConfig, CaptureEngine, CaptureSource, Limit, PcapSource};
use pktscope::config::Config;
use pktscope::error::ConfigError;
use pktscope::packet::{OwnedPacket, PacketData};
use pktscope::pipeline::{self, PacketHandler, Relay, Shutdown, WorkerPool};
use pktscope::pool::BufferPool;
use pktscope::protocol::{Ip4View, TcpView};

fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing/logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    if args.list_interfaces {
        list_interfaces();
        return;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// List available network interfaces and print them.
fn list_interfaces() {
    match capture::list_interfaces() {
        Ok(devices) => {
            println!("Available network interfaces:");
            println!("{:<20} {:<20} {}", "Name", "Description", "Addresses");
            println!("{}", "-".repeat(70));
            for device in &devices {
                let desc = device.desc.as_deref().unwrap_or("");
                let addrs: Vec<String> = device
                    .addresses
                    .iter()
                    .map(|a| format!("{}", a.addr))
                    .collect();
                println!("{:<20} {:<20} {}", device.name, desc, addrs.join(", "));
            }
            if devices.is_empty() {
                println!("  (no interfaces found, try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

fn load_config(args: &cli::Cli) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(value) = &args.interface {
        config.capture.interface = Some(value.clone());
    }
    if let Some(value) = &args.file {
        config.capture.file = Some(value.clone());
    }
    if let Some(value) = &args.filter {
        config.capture.filter = Some(value.clone());
    }
    if let Some(value) = args.count {
        config.run.count = value;
    }
    if let Some(value) = args.snaplen {
        config.capture.snaplen = value;
    }
    if let Some(value) = args.timeout_ms {
        config.capture.timeout_ms = value;
    }
    if let Some(value) = args.buffer_size {
        config.capture.buffer_size = value;
    }
    if let Some(value) = args.max_batch {
        config.capture.max_batch = value;
    }
    if let Some(value) = args.pool_capacity {
        config.pool.capacity = value;
    }
    if let Some(value) = args.slot_size {
        config.pool.slot_size = value;
        config.pool.buckets.clear();
    }
    if let Some(value) = args.relay_capacity {
        config.relay.capacity = value;
    }
    if let Some(value) = args.workers {
        config.relay.workers = value;
    }
    if args.no_promiscuous {
        config.capture.promiscuous = false;
    }
    if args.poison {
        config.capture.poison_released = true;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: &Config) -> Result<(), Box<dyn Error>> {
    match &config.capture.file {
        Some(path) => {
            println!("Reading from file: {}", path.display());
            let source = PcapSource::open_offline(path, config.capture.filter.as_deref())?;
            run_pipeline(source, config)
        }
        None => {
            let capture_config = CaptureConfig {
                interface: config.capture.interface.clone(),
                promiscuous: config.capture.promiscuous,
                snaplen: config.capture.snaplen,
                timeout_ms: config.capture.timeout_ms,
                buffer_size: i32::try_from(config.capture.buffer_size).ok(),
                filter: config.capture.filter.clone(),
            };
            let source = PcapSource::open_live(&capture_config)?;
            println!(
                "Capturing on interface: {}",
                config.capture.interface.as_deref().unwrap_or("(default)")
            );
            run_pipeline(source, config)
        }
    }
}

/// Worker-side handler: counts connection attempts among the TCP packets it
/// is handed.
#[derive(Default)]
struct SynCounter {
    tcp: TcpView,
    packets: u64,
    syns: u64,
}

impl PacketHandler for SynCounter {
    fn handle(&mut self, packet: &OwnedPacket) {
        self.packets += 1;
        if !packet.has_header(&mut self.tcp) {
            return;
        }
        if let Ok(tcp) = self.tcp.header(packet) {
            if tcp.syn() && !tcp.ack() {
                self.syns += 1;
            }
        }
    }
}

/// Join the workers, which returns every queued slot, then free the pool.
fn teardown(workers: WorkerPool<SynCounter>, pool: &BufferPool) -> Shutdown<SynCounter> {
    let report = workers.shutdown();
    if let Err(err) = pool.close() {
        tracing::warn!(error = %err, "pool not closed cleanly");
    }
    report
}

/// Capture loop: persist IPv4/TCP packets into the pool and hand them to
/// the workers through the relay.
fn run_pipeline<S: CaptureSource>(source: S, config: &Config) -> Result<(), Box<dyn Error>> {
    let pool = BufferPool::new(
        config.pool.capacity,
        config.size_policy(),
        config.pool.preallocate,
    );
    let relay = Relay::new(config.relay.capacity);
    let running = Arc::new(AtomicBool::new(true));
    let workers = pipeline::spawn(relay.clone(), config.worker_config(), running, |_| {
        SynCounter::default()
    })?;

    let mut engine = CaptureEngine::new(source, config.engine_config());
    let interrupt = engine.interrupt_handle();
    if let Err(err) = ctrlc::set_handler(move || {
        interrupt.interrupt();
        eprintln!("\nInterrupt received, stopping capture...");
    }) {
        teardown(workers, &pool);
        return Err(err.into());
    }

    println!("pktscope v{}", env!("CARGO_PKG_VERSION"));
    if let Some(filter) = &config.capture.filter {
        println!("Filter: {}", filter);
    }
    if config.run.count > 0 {
        println!("Capturing {} packets...", config.run.count);
    } else {
        println!("Capturing packets (Ctrl-C to stop)...");
    }
    println!();

    let mut ip4 = Ip4View::new();
    let mut tcp = TcpView::new();
    let mut persisted: u64 = 0;
    let mut pool_exhausted: u64 = 0;
    let started = Instant::now();

    let result = engine.loop_packets(Limit::from_count(config.run.count), |packet| {
        if !(packet.has_header(&mut ip4) && packet.has_header(&mut tcp)) {
            return;
        }
        match packet.persist_to(&pool) {
            Ok(owned) => {
                if relay.try_put(owned) {
                    persisted += 1;
                }
            }
            Err(err) => {
                tracing::trace!(frame = packet.frame_no(), error = %err, "packet not persisted");
                pool_exhausted += 1;
            }
        }
    });

    let engine_stats = engine.close();
    let report = teardown(workers, &pool);
    let elapsed = started.elapsed();
    let outcome = result?;

    let syns: u64 = report.handlers.iter().map(|h| h.syns).sum();
    let handled: u64 = report.handlers.iter().map(|h| h.packets).sum();
    let relay_stats = relay.stats();

    println!();
    println!("--- capture summary ---");
    println!("stopped:         {:?}", outcome.reason);
    println!("elapsed:         {:.2}s", elapsed.as_secs_f64());
    println!("captured:        {}", outcome.delivered);
    println!("bytes:           {}", engine_stats.bytes);
    println!("persisted:       {}", persisted);
    println!("pool exhausted:  {}", pool_exhausted);
    println!("relay dropped:   {}", relay_stats.dropped);
    println!("processed:       {}", report.processed);
    println!("drained:         {}", report.drained);
    println!("syn packets:     {} (of {} handled)", syns, handled);

    Ok(())
}
