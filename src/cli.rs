use clap::Parser;
use std::path::PathBuf;

/// pktscope: pooled packet capture with a worker-thread pipeline
#[derive(Parser, Debug)]
#[command(name = "pktscope", version, about)]
pub struct Cli {
    /// Path to a TOML config file. Flags override values from the file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Network interface to capture on (e.g., "en0", "eth0").
    /// If not specified, the default interface is used.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Read packets from a pcap savefile instead of a live interface
    #[arg(short = 'r', long = "read")]
    pub file: Option<PathBuf>,

    /// BPF filter expression (e.g., "tcp port 80", "host 192.168.1.1")
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Maximum number of packets to capture (0 = unlimited)
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Disable promiscuous mode
    #[arg(long, default_value_t = false)]
    pub no_promiscuous: bool,

    /// Snapshot length (max bytes per packet to capture)
    #[arg(short, long)]
    pub snaplen: Option<i32>,

    /// Read timeout in milliseconds for the capture handle
    #[arg(short = 't', long)]
    pub timeout_ms: Option<i32>,

    /// Capture buffer size in bytes
    #[arg(short = 'B', long)]
    pub buffer_size: Option<usize>,

    /// Maximum packets fetched per batch
    #[arg(long)]
    pub max_batch: Option<usize>,

    /// Total pool slots, shared by all size classes
    #[arg(long)]
    pub pool_capacity: Option<usize>,

    /// Pool slot size in bytes
    #[arg(long)]
    pub slot_size: Option<usize>,

    /// Relay queue capacity
    #[arg(long)]
    pub relay_capacity: Option<usize>,

    /// Number of worker threads (0 = auto)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Overwrite released capture memory with a canary byte
    #[arg(long, default_value_t = false)]
    pub poison: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,
}
