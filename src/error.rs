//! Unified error type for the tap interface and the forwarding server.
//!
//! `TapError` is the single error type surfaced by the tap engine. Each
//! variant maps to a distinct failure domain; the server layer wraps it in
//! `anyhow` context before it reaches the top-level handler.

use std::io;

/// Errors raised while opening, driving, or tearing down the tap interface.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    /// The process lacks the privilege required for raw sockets and `/dev/bpf*`.
    #[error("insufficient permissions (root required)")]
    PermissionDenied,

    /// The `AF_NDRV` injection socket could not be opened, bound, or connected.
    #[error("cannot {action} network driver socket: {source}")]
    DriverSocket {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    /// No usable `/dev/bpf*` capture device was found.
    #[error("no available bpf device")]
    NoCaptureDevice,

    /// A BPF configuration ioctl failed during `open`.
    #[error("cannot {action}: {source}")]
    CaptureSetup {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    /// A read from the capture device failed at runtime.
    #[error("read error from network interface: {0}")]
    CaptureRead(#[source] io::Error),

    /// The capture device returned end-of-file.
    #[error("network interface was closed")]
    CaptureClosed,

    /// A write to the injection socket failed.
    #[error("cannot inject frame: {0}")]
    Inject(#[source] io::Error),

    /// The interface tool could not be spawned or exited unsuccessfully.
    #[error("interface command failed: {command}: {detail}")]
    Ifconfig { command: String, detail: String },

    /// An interface name exceeds the capacity of the kernel structure it
    /// must be copied into.
    #[error("device name is too long: {name} (must be {max} bytes or shorter)")]
    NameTooLong { name: String, max: usize },

    /// The poll primitive failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// A self-delimited client stream contained bytes whose frame boundary
    /// cannot be determined.
    #[error("cannot determine frame size")]
    UnknownFrameSize,

    /// The tap engine was built for a platform without feth/NDRV/BPF support.
    #[error("tap interfaces are only supported on macOS")]
    UnsupportedPlatform,
}
