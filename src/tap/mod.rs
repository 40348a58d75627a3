//! The tap interface engine.
//!
//! A `TapInterface` owns a pair of peered `feth` endpoints: the net side
//! carries the user-visible MAC and IPv4 address, the io side is where this
//! process injects (raw driver socket) and captures (BPF device) frames.
//! Opening runs the whole kernel setup sequence; dropping tears it all down,
//! destroying the endpoints on every exit path.

pub mod capture;
pub mod ifcfg;

#[cfg(target_os = "macos")]
#[path = "sys_macos.rs"]
mod sys;
#[cfg(not(target_os = "macos"))]
#[path = "sys_unsupported.rs"]
mod sys;

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::str::FromStr;
use std::time::Duration;

use nix::errno::Errno;

use crate::config;
use crate::error::TapError;
use crate::poll::Poll;
use ifcfg::{DeviceGuard, IfconfigRunner};

/// An Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    /// Accepts `XX:XX:XX:XX:XX:XX` or 12 bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|&c| c != ':' && c != '-').collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{s}' is not a 6-byte MAC address"));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).unwrap();
        }
        Ok(MacAddr(bytes))
    }
}

/// Interface configuration, immutable once the tap is open.
#[derive(Debug, Clone)]
pub struct TapConfig {
    /// Device number of the host-visible endpoint (`feth<N>`).
    pub network_device_number: u32,
    /// Device number of the injection/capture endpoint (`feth<N>`).
    pub io_device_number: u32,
    pub mac_address: MacAddr,
    pub ip_address: Ipv4Addr,
    pub mtu: u32,
    pub metric: u32,
    pub enable_nud: bool,
    pub enable_router_advertisements: bool,
    pub ifconfig_command: String,
}

/// The created endpoint pair. Dropping destroys both devices, net side
/// first, logging (not raising) on failure.
#[derive(Debug)]
struct Endpoints {
    runner: IfconfigRunner,
    network_device: String,
    io_device: String,
}

impl Drop for Endpoints {
    fn drop(&mut self) {
        ifcfg::destroy_device(&self.runner, &self.network_device);
        ifcfg::destroy_device(&self.runner, &self.io_device);
    }
}

/// An open tap: both endpoints exist, the injection socket is connected, the
/// capture device is attached, and captured frames queue in arrival order.
///
/// All methods are single-threaded; nothing here is `Sync`.
#[derive(Debug)]
pub struct TapInterface {
    driver_socket: OwnedFd,
    bpf: File,
    // Declared after the descriptors so teardown closes both before the
    // endpoints are destroyed.
    endpoints: Endpoints,
    poll: Poll,
    received_frames: VecDeque<Vec<u8>>,
    max_read_size: usize,
}

impl TapInterface {
    /// Create and configure the endpoint pair and attach the kernel I/O
    /// channels. Endpoints already created when a later step fails are
    /// destroyed before the error is returned.
    pub fn open(config: &TapConfig) -> Result<Self, TapError> {
        if !nix::unistd::Uid::current().is_root() {
            return Err(TapError::PermissionDenied);
        }

        let driver_socket = sys::open_driver_socket()?;

        let io_device = format!("feth{}", config.io_device_number);
        let network_device = format!("feth{}", config.network_device_number);
        let runner = IfconfigRunner::new(&config.ifconfig_command);

        let mut guard = DeviceGuard::new(runner.clone());
        guard.create(&io_device)?;
        guard.create(&network_device)?;

        let mac = config.mac_address.to_string();
        let ip = config.ip_address.to_string();
        let io_mtu = config::IO_DEVICE_MTU.to_string();
        let mtu = config.mtu.to_string();
        let metric = config.metric.to_string();

        runner.run(&[network_device.as_str(), "lladdr", mac.as_str()])?;
        runner.run(&[network_device.as_str(), ip.as_str()])?;

        runner.run(&[io_device.as_str(), "peer", network_device.as_str()])?;
        runner.run(&[io_device.as_str(), "mtu", io_mtu.as_str(), "up"])?;
        runner.run(&[
            network_device.as_str(),
            "mtu",
            mtu.as_str(),
            "metric",
            metric.as_str(),
            "up",
        ])?;

        // Let the kernel finish activating the interfaces before the IPv6
        // ioctls touch them.
        std::thread::sleep(Duration::from_millis(config::IFACE_SETTLE_DELAY_MS));
        sys::apply_ipv6_flags(
            &network_device,
            config.enable_nud,
            config.enable_router_advertisements,
        );

        sys::bind_driver_socket(&driver_socket, &io_device)?;

        let bpf = sys::open_capture_device()?;
        let max_read_size = sys::configure_capture(&bpf, &io_device)?;

        let mut poll = Poll::new();
        poll.register(bpf.as_raw_fd());

        guard.release();
        Ok(Self {
            driver_socket,
            bpf,
            endpoints: Endpoints {
                runner,
                network_device,
                io_device,
            },
            poll,
            received_frames: VecDeque::new(),
            max_read_size,
        })
    }

    /// Inject one raw Ethernet frame onto the link. The write is
    /// all-or-nothing: short writes and interruptions are retried until the
    /// whole frame is delivered.
    pub fn send(&self, frame: &[u8]) -> Result<(), TapError> {
        let mut written = 0;
        while written < frame.len() {
            match nix::unistd::write(&self.driver_socket, &frame[written..]) {
                Ok(n) => written += n,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(TapError::Inject(errno.into())),
            }
        }
        Ok(())
    }

    /// Return the oldest captured frame, waiting up to `timeout_ms` for one
    /// to arrive. `None` means the timeout elapsed with nothing captured.
    pub fn recv(&mut self, timeout_ms: u16) -> Result<Option<Vec<u8>>, TapError> {
        if self.received_frames.is_empty() {
            let events = match self.poll.wait(Some(timeout_ms)) {
                Err(Errno::EINTR) => Vec::new(),
                other => other.map_err(|e| TapError::Poll(e.into()))?,
            };
            let bpf_fd = self.bpf.as_raw_fd();
            if events.iter().any(|e| e.fd == bpf_fd && e.readable) {
                self.on_data_available()?;
            }
        }
        Ok(self.received_frames.pop_front())
    }

    /// Drain one read's worth of capture records into the frame queue.
    ///
    /// Must be called when the capture descriptor polls readable; an
    /// embedding event loop that polls [`Self::poll_mut`] itself calls this
    /// before draining with `recv(0)`.
    pub fn on_data_available(&mut self) -> Result<(), TapError> {
        let mut buffer = vec![0u8; self.max_read_size];
        let len = loop {
            match (&self.bpf).read(&mut buffer) {
                Ok(0) => return Err(TapError::CaptureClosed),
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TapError::CaptureRead(e)),
            }
        };
        enqueue_capture(&buffer[..len], &mut self.received_frames);
        Ok(())
    }

    /// The capture descriptor, for callers multiplexing the tap with other
    /// descriptors.
    pub fn capture_fd(&self) -> RawFd {
        self.bpf.as_raw_fd()
    }

    /// The shared poll set. The capture descriptor is already registered.
    pub fn poll_mut(&mut self) -> &mut Poll {
        &mut self.poll
    }

    pub fn io_device(&self) -> &str {
        &self.endpoints.io_device
    }

    pub fn network_device(&self) -> &str {
        &self.endpoints.network_device
    }
}

impl Drop for TapInterface {
    fn drop(&mut self) {
        self.poll.unregister(self.bpf.as_raw_fd());
        // Field drop order does the rest: the driver socket and capture
        // device close, then `endpoints` destroys both devices.
    }
}

/// Append every frame in a capture buffer to the queue, in capture order.
fn enqueue_capture(buffer: &[u8], queue: &mut VecDeque<Vec<u8>>) {
    for frame in capture::records(buffer) {
        queue.push_back(frame.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parses_colon_separated() {
        let mac: MacAddr = "90:90:90:90:90:90".parse().unwrap();
        assert_eq!(mac.0, [0x90; 6]);
        let mac: MacAddr = "de:ad:BE:EF:00:01".parse().unwrap();
        assert_eq!(mac.0, [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
    }

    #[test]
    fn test_mac_parses_bare_hex() {
        let mac: MacAddr = "deadbeef0001".parse().unwrap();
        assert_eq!(mac.0, [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
    }

    #[test]
    fn test_mac_rejects_bad_input() {
        assert!("90:90:90:90:90".parse::<MacAddr>().is_err());
        assert!("90:90:90:90:90:90:90".parse::<MacAddr>().is_err());
        assert!("gg:90:90:90:90:90".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_display_round_trip() {
        let mac: MacAddr = "0a:1b:2c:3d:4e:5f".parse().unwrap();
        assert_eq!(mac.to_string(), "0A:1B:2C:3D:4E:5F");
        assert_eq!(mac.to_string().parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn test_enqueue_preserves_capture_order() {
        let mut buf = Vec::new();
        for fill in [0x01u8, 0x02, 0x03] {
            let start = buf.len();
            let mut header = [0u8; 18];
            header[8..12].copy_from_slice(&32u32.to_ne_bytes());
            header[16..18].copy_from_slice(&18u16.to_ne_bytes());
            buf.extend_from_slice(&header);
            buf.extend_from_slice(&[fill; 32]);
            let record_len = buf.len() - start;
            buf.resize(start + ((record_len + 3) & !3), 0);
        }

        let mut queue = VecDeque::new();
        enqueue_capture(&buf, &mut queue);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap()[0], 0x01);
        assert_eq!(queue.pop_front().unwrap()[0], 0x02);
        assert_eq!(queue.pop_front().unwrap()[0], 0x03);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_open_fails_off_platform() {
        let config = TapConfig {
            network_device_number: 1,
            io_device_number: 2,
            mac_address: MacAddr([0x90; 6]),
            ip_address: Ipv4Addr::new(172, 30, 0, 1),
            mtu: 1500,
            metric: 0,
            enable_nud: true,
            enable_router_advertisements: false,
            ifconfig_command: "true".into(),
        };
        match TapInterface::open(&config) {
            Err(TapError::PermissionDenied) | Err(TapError::UnsupportedPlatform) => {}
            other => panic!("expected an open failure, got {other:?}"),
        }
    }
}
