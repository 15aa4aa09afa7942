use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::EngineConfig;
use crate::error::ConfigError;
use crate::pipeline::WorkerConfig;
use crate::pool::SizePolicy;

fn empty_path_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(opt.and_then(|path| {
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureSection,
    pub pool: PoolSection,
    pub relay: RelaySection,
    pub run: RunSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine, pool or relay would refuse to start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.capture.buffer_size == 0 {
            return invalid("capture.buffer_size must be non-zero");
        }
        if self.capture.max_batch == 0 {
            return invalid("capture.max_batch must be non-zero");
        }
        if self.capture.snaplen <= 0 {
            return invalid("capture.snaplen must be positive");
        }
        if self.pool.capacity == 0 {
            return invalid("pool.capacity must be non-zero");
        }
        if self.pool.slot_size == 0 && self.pool.buckets.is_empty() {
            return invalid("pool.slot_size or pool.buckets must be set");
        }
        if self.pool.buckets.contains(&0) {
            return invalid("pool.buckets must not contain 0");
        }
        if self.relay.capacity == 0 {
            return invalid("relay.capacity must be non-zero");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_size: self.capture.buffer_size,
            timeout: Duration::from_millis(self.capture.timeout_ms.max(0) as u64),
            max_batch: self.capture.max_batch,
            poison_released: self.capture.poison_released,
        }
    }

    /// Bucket sizes win over `slot_size` when both are given.
    pub fn size_policy(&self) -> SizePolicy {
        if self.pool.buckets.is_empty() {
            SizePolicy::Fixed(self.pool.slot_size)
        } else {
            SizePolicy::Buckets(self.pool.buckets.clone())
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.relay.workers,
            take_timeout: Duration::from_millis(self.relay.take_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub interface: Option<String>,
    /// Read a savefile instead of a live device.
    #[serde(deserialize_with = "empty_path_none")]
    pub file: Option<PathBuf>,
    pub filter: Option<String>,
    pub promiscuous: bool,
    pub snaplen: i32,
    /// Engine batch buffer in bytes; also passed to libpcap as the kernel
    /// buffer size for live captures.
    pub buffer_size: usize,
    pub timeout_ms: i32,
    pub max_batch: usize,
    pub poison_released: bool,
}

impl Default for CaptureSection {
    fn default() -> Self {
        CaptureSection {
            interface: None,
            file: None,
            filter: None,
            promiscuous: true,
            snaplen: 65535,
            buffer_size: 4 * 1024 * 1024,
            timeout_ms: 100,
            max_batch: 64,
            poison_released: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Total slots, shared by every size class.
    pub capacity: usize,
    pub slot_size: usize,
    pub buckets: Vec<usize>,
    pub preallocate: bool,
}

impl Default for PoolSection {
    fn default() -> Self {
        PoolSection {
            capacity: 1024,
            slot_size: 2048,
            buckets: Vec::new(),
            preallocate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub capacity: usize,
    /// Worker threads (0 = auto-detect from CPU count).
    pub workers: usize,
    pub take_timeout_ms: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        RelaySection {
            capacity: 512,
            workers: 0,
            take_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Packets to capture (0 = unbounded).
    pub count: u64,
}
