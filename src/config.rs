//! Centralized runtime constants for tapserver.
//!
//! All tunable sizes and delays are collected here so they can be found and
//! adjusted in a single place rather than scattered across modules.

/// Requested BPF receive buffer size in bytes. The value the kernel actually
/// grants is recorded at open time and used as the per-read buffer size.
pub const BPF_BUFFER_SIZE: u32 = 128 * 1024;

/// MTU assigned to the io-side endpoint. Large enough that the io side never
/// fragments frames destined for any user-configurable net-side MTU.
pub const IO_DEVICE_MTU: u32 = 16370;

/// Delay after bringing the endpoints up, so the kernel finishes interface
/// activation before the IPv6 ioctls run (milliseconds).
pub const IFACE_SETTLE_DELAY_MS: u64 = 100;

/// Upper bound on the `/dev/bpfN` scan. Reaching it without a single
/// successful open is reported as "no available bpf device".
pub const BPF_SCAN_LIMIT: u32 = 256;

/// Bytes read from the client socket per poll wakeup.
pub const CLIENT_READ_CHUNK: usize = 64 * 1024;

/// Default device number for the host-visible (address-bearing) endpoint.
pub const DEFAULT_NETWORK_DEVICE_NUMBER: u32 = 1;

/// Default device number for the injection/capture endpoint.
pub const DEFAULT_IO_DEVICE_NUMBER: u32 = 2;

/// Default MAC address assigned to the host-visible endpoint.
pub const DEFAULT_MAC_ADDRESS: &str = "90:90:90:90:90:90";

/// Default IPv4 address assigned to the host-visible endpoint.
pub const DEFAULT_IP_ADDRESS: &str = "172.30.0.1";

/// Default net-side MTU.
pub const DEFAULT_MTU: u32 = 1500;
