//! libpcap-backed capture source: live devices and savefiles.
//!
//! Live handles run in non-blocking mode. A fill waits on the handle's
//! selectable descriptor for at most the caller's timeout until the first
//! frame arrives, then takes only what libpcap already has buffered, so a
//! slow trickle of traffic is delivered as it comes rather than once a whole
//! batch has accumulated.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use pcap::{Activated, Active, Capture, Device, Offline};

use super::{Batch, CaptureSource};
use crate::error::{CaptureError, SourceError};
use crate::packet::{FrameMeta, Timestamp};

/// Largest record libpcap writes to a savefile.
const MAX_SAVEFILE_SNAPLEN: usize = 262_144;

/// Options for opening a live capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
    /// Kernel capture buffer in bytes; `None` keeps the libpcap default.
    pub buffer_size: Option<i32>,
    pub filter: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            promiscuous: true,
            snaplen: 65535,
            timeout_ms: 100,
            buffer_size: None,
            filter: None,
        }
    }
}

/// List all available network interfaces.
pub fn list_interfaces() -> Result<Vec<Device>, CaptureError> {
    Ok(Device::list()?)
}

/// A [`CaptureSource`] reading from a pcap handle.
pub struct PcapSource<T: Activated + ?Sized> {
    capture: Capture<T>,
    snaplen: usize,
    /// Descriptor to wait on for the first frame of a fill; savefiles have none.
    wait_fd: Option<RawFd>,
    exhausted: bool,
}

impl PcapSource<Active> {
    /// Open a live capture with the given configuration.
    pub fn open_live(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let device = match &config.interface {
            Some(name) => Device::list()?
                .into_iter()
                .find(|d| d.name == *name)
                .ok_or_else(|| CaptureError::NoDevice(format!("interface '{}' not found", name)))?,
            None => Device::lookup()?
                .ok_or_else(|| CaptureError::NoDevice("no default device found".into()))?,
        };
        let device_name = device.name.clone();

        let mut inactive = Capture::from_device(device)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms);
        if let Some(size) = config.buffer_size {
            inactive = inactive.buffer_size(size);
        }
        let mut capture = inactive.open()?.setnonblock()?;

        if let Some(filter) = &config.filter {
            capture.filter(filter, true)?;
        }

        tracing::info!(
            interface = %device_name,
            promiscuous = config.promiscuous,
            snaplen = config.snaplen,
            filter = config.filter.as_deref().unwrap_or("none"),
            "live capture opened"
        );

        let wait_fd = Some(capture.as_raw_fd());
        Ok(PcapSource {
            capture,
            snaplen: config.snaplen.max(0) as usize,
            wait_fd,
            exhausted: false,
        })
    }
}

impl PcapSource<Offline> {
    /// Open a savefile. The source is exhausted at end of file.
    pub fn open_offline(path: impl AsRef<Path>, filter: Option<&str>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let mut capture = Capture::from_file(path)?;
        if let Some(filter) = filter {
            capture.filter(filter, true)?;
        }
        tracing::info!(
            file = %path.display(),
            filter = filter.unwrap_or("none"),
            "savefile opened"
        );

        Ok(PcapSource {
            capture,
            snaplen: MAX_SAVEFILE_SNAPLEN,
            wait_fd: None,
            exhausted: false,
        })
    }
}

/// Block until `fd` is readable or `timeout` passes. Returns whether it is readable.
fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool, SourceError> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: `pfd` is a valid pollfd for the duration of the call and nfds is 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(SourceError::with_cause("poll on capture handle failed", err));
    }
    Ok(rc > 0 && pfd.revents & libc::POLLIN != 0)
}

impl<T: Activated + ?Sized> CaptureSource for PcapSource<T> {
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        max: usize,
        timeout: Duration,
    ) -> Result<usize, SourceError> {
        if self.exhausted {
            return Ok(0);
        }
        let mut added = 0;
        let mut waited = false;
        while added < max && !batch.is_full() {
            // libpcap cannot push a packet back, so only read one that is
            // certain to fit.
            if added > 0 && batch.remaining() < self.snaplen {
                break;
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    let header = packet.header;
                    let meta = FrameMeta {
                        timestamp: Timestamp::from_micros(
                            header.ts.tv_sec as u64,
                            header.ts.tv_usec as u32,
                        ),
                        wire_len: header.len,
                    };
                    if batch.push(meta, packet.data) {
                        added += 1;
                    } else {
                        tracing::warn!(len = packet.data.len(), "frame did not fit in batch, dropped");
                    }
                }
                // Non-blocking live handle with nothing buffered.
                Err(pcap::Error::TimeoutExpired) => {
                    if added > 0 || waited {
                        break;
                    }
                    let Some(fd) = self.wait_fd else {
                        break;
                    };
                    waited = true;
                    if !wait_readable(fd, timeout)? {
                        break;
                    }
                }
                Err(pcap::Error::NoMorePackets) => {
                    tracing::debug!("end of savefile");
                    self.exhausted = true;
                    break;
                }
                Err(err) => return Err(SourceError::with_cause("pcap read failed", err)),
            }
        }
        Ok(added)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn wait_readable_times_out_on_idle_descriptor() {
        let (a, _b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!wait_readable(a.as_raw_fd(), Duration::from_millis(20)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wait_readable_returns_once_data_is_buffered() {
        use std::io::Write;
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        let start = Instant::now();
        assert!(wait_readable(a.as_raw_fd(), Duration::from_secs(5)).unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
