//! Linux TAP link-layer driver.
//!
//! [`TapDriver`] is the interface-init callback for [`SmolStack`]: each
//! time the stack adds its interface the driver opens a fresh TAP device
//! and hands it over. Removing the interface drops the device, which
//! closes the file descriptor and releases the kernel-side queue.
//!
//! Frame counters live in the driver and are shared with every device it
//! opens, so statistics accumulate across reinitialization.
//!
//! [`SmolStack`]: crate::smol::SmolStack

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smoltcp::phy::{self, DeviceCapabilities, Medium};
use smoltcp::time::Instant;
use tracing::{debug, trace};

use crate::diagnostics::LinkStats;
use crate::error::{Error, Result};
use crate::smol::LinkDriver;
use crate::util::addr::format_mac;

/// Path to the TUN/TAP clone device.
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Ethernet header length.
const ETHERNET_HEADER_LEN: usize = 14;

// From linux/if_tun.h
const TUNSETIFF: libc::c_ulong = 0x400454ca;
/// TAP device (Layer 2).
const IFF_TAP: libc::c_short = 0x0002;
/// No protocol information.
const IFF_NO_PI: libc::c_short = 0x1000;

/// TAP device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapConfig {
    /// Device name, e.g. "tap0".
    pub name: String,
    /// MAC address the stack uses on the device.
    pub mac: [u8; 6],
    /// IP MTU (default: 1500).
    pub mtu: usize,
}

impl TapConfig {
    /// Configuration for the named device with default MAC and MTU.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            mtu: 1500,
        }
    }

    /// Set the MAC address.
    pub fn mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self
    }

    /// Set the MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > libc::IFNAMSIZ - 1 {
            return Err(Error::NameTooLong {
                name: self.name.clone(),
                len: self.name.len(),
            });
        }
        Ok(())
    }
}

/// Frame counters shared between a driver and its devices.
#[derive(Debug, Default)]
pub struct LinkCounters {
    rx_frames: AtomicU64,
    rx_bytes: AtomicU64,
    tx_frames: AtomicU64,
    tx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    tx_errors: AtomicU64,
}

impl LinkCounters {
    fn received(&self, len: usize) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn sent(&self, len: usize) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn rx_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn snapshot(&self) -> LinkStats {
        LinkStats {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }
}

/// An open, non-blocking TAP device.
pub struct TapDevice {
    file: File,
    name: String,
    rx_buffer: Vec<u8>,
    counters: Arc<LinkCounters>,
}

impl TapDevice {
    /// Open the TAP device described by `config`.
    pub fn open(config: &TapConfig, counters: Arc<LinkCounters>) -> Result<Self> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(TUN_DEVICE_PATH)?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        ifr.ifr_ifru.ifru_flags = IFF_TAP | IFF_NO_PI;

        let name_bytes = config.name.as_bytes();
        let name_slice = unsafe { &mut *(&mut ifr.ifr_name as *mut [libc::c_char] as *mut [u8]) };
        name_slice[..name_bytes.len()].copy_from_slice(name_bytes);

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &ifr) };
        if ret < 0 {
            return Err(Error::ioctl("TUNSETIFF", io::Error::last_os_error()));
        }

        // The kernel may have rewritten the name (e.g. "tap%d").
        let name = {
            let name_slice = unsafe { &*(&ifr.ifr_name as *const [libc::c_char] as *const [u8]) };
            let len = name_slice
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(name_slice.len());
            String::from_utf8_lossy(&name_slice[..len]).to_string()
        };
        debug!(device = %name, "tap device opened");

        Ok(Self::from_file(
            file,
            name,
            config.mtu + ETHERNET_HEADER_LEN,
            counters,
        ))
    }

    fn from_file(file: File, name: String, frame_len: usize, counters: Arc<LinkCounters>) -> Self {
        Self {
            file,
            name,
            rx_buffer: vec![0; frame_len],
            counters,
        }
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl phy::Device for TapDevice {
    type RxToken<'a>
        = TapRxToken<'a>
    where
        Self: 'a;
    type TxToken<'a>
        = TapTxToken<'a>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        match (&self.file).read(&mut self.rx_buffer) {
            Ok(len) => {
                self.counters.received(len);
                trace!(len, "frame received");
                Some((
                    TapRxToken {
                        frame: &mut self.rx_buffer[..len],
                    },
                    TapTxToken {
                        file: &self.file,
                        counters: &self.counters,
                    },
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                self.counters.rx_error();
                debug!(error = %e, "tap read failed");
                None
            }
        }
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(TapTxToken {
            file: &self.file,
            counters: &self.counters,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = self.rx_buffer.len();
        caps
    }
}

/// A received frame, borrowed from the device's receive buffer.
pub struct TapRxToken<'a> {
    frame: &'a mut [u8],
}

impl phy::RxToken for TapRxToken<'_> {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame)
    }
}

/// Permission to send one frame.
pub struct TapTxToken<'a> {
    file: &'a File,
    counters: &'a LinkCounters,
}

impl phy::TxToken for TapTxToken<'_> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = vec![0u8; len];
        let result = f(&mut buffer);
        let mut file = self.file;
        match file.write(&buffer) {
            Ok(_) => self.counters.sent(len),
            Err(e) => {
                self.counters.tx_error();
                debug!(error = %e, "tap write failed");
            }
        }
        result
    }
}

/// Opens a TAP device each time the interface is added.
#[derive(Debug)]
pub struct TapDriver {
    config: TapConfig,
    counters: Arc<LinkCounters>,
}

impl TapDriver {
    /// Create a driver. The device is not opened until the interface is added.
    pub fn new(config: TapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            counters: Arc::new(LinkCounters::default()),
        })
    }

    /// The device configuration.
    pub fn config(&self) -> &TapConfig {
        &self.config
    }
}

impl LinkDriver for TapDriver {
    type Device = TapDevice;

    fn init(&mut self) -> Result<TapDevice> {
        debug!(
            device = %self.config.name,
            mac = %format_mac(&self.config.mac),
            "opening tap device"
        );
        TapDevice::open(&self.config, Arc::clone(&self.counters))
    }

    fn hardware_addr(&self) -> [u8; 6] {
        self.config.mac
    }

    fn link_stats(&self) -> LinkStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixDatagram;

    use smoltcp::phy::{Device, RxToken, TxToken};

    fn device_pair() -> (TapDevice, UnixDatagram) {
        let (ours, peer) = UnixDatagram::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let file = File::from(OwnedFd::from(ours));
        let device = TapDevice::from_file(
            file,
            "test0".to_string(),
            1500 + ETHERNET_HEADER_LEN,
            Arc::default(),
        );
        (device, peer)
    }

    #[test]
    fn test_config_builder() {
        let config = TapConfig::new("tap7").mac([2, 0, 0, 0, 0, 9]).mtu(9000);
        assert_eq!(config.name, "tap7");
        assert_eq!(config.mac, [2, 0, 0, 0, 0, 9]);
        assert_eq!(config.mtu, 9000);
    }

    #[test]
    fn test_name_too_long() {
        let err = TapDriver::new(TapConfig::new("a-very-long-tap-name")).unwrap_err();
        assert!(matches!(err, Error::NameTooLong { len: 20, .. }));
    }

    #[test]
    fn test_counters() {
        let counters = LinkCounters::default();
        counters.received(60);
        counters.sent(42);
        counters.sent(42);
        counters.tx_error();

        let stats = counters.snapshot();
        assert_eq!(stats.rx_frames, 1);
        assert_eq!(stats.rx_bytes, 60);
        assert_eq!(stats.tx_frames, 2);
        assert_eq!(stats.tx_bytes, 84);
        assert_eq!(stats.total_errors(), 1);
    }

    #[test]
    fn test_driver_stats_start_empty() {
        let driver = TapDriver::new(TapConfig::new("tap0")).unwrap();
        assert_eq!(driver.link_stats(), LinkStats::default());
        assert_eq!(driver.hardware_addr(), [0x02, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_receive_reuses_buffer() {
        let (mut device, peer) = device_pair();
        let buffer = device.rx_buffer.as_ptr();
        assert!(device.receive(Instant::from_millis(0)).is_none());

        peer.send(&[0xaa; 60]).unwrap();
        let (rx, tx) = device.receive(Instant::from_millis(0)).unwrap();
        let len = rx.consume(|frame| {
            assert!(frame.iter().all(|&b| b == 0xaa));
            frame.len()
        });
        assert_eq!(len, 60);
        tx.consume(42, |frame| frame.fill(0x55));

        let mut reply = [0u8; 64];
        assert_eq!(peer.recv(&mut reply).unwrap(), 42);

        assert!(device.receive(Instant::from_millis(0)).is_none());
        assert_eq!(device.rx_buffer.as_ptr(), buffer);
        assert_eq!(device.rx_buffer.len(), 1514);
        assert_eq!(device.capabilities().max_transmission_unit, 1514);

        let stats = device.counters.snapshot();
        assert_eq!((stats.rx_frames, stats.rx_bytes), (1, 60));
        assert_eq!((stats.tx_frames, stats.tx_bytes), (1, 42));
    }
}
