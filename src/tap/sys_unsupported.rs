//! Stub platform layer for targets without feth/NDRV/BPF support.
//!
//! The tap engine only exists on the macOS kernel family; elsewhere `open`
//! fails up front and none of the remaining plumbing is reachable. The pure
//! components (classifier, codec, record parser) still build and test here.

use std::fs::File;
use std::os::fd::OwnedFd;

use crate::error::TapError;

pub fn open_driver_socket() -> Result<OwnedFd, TapError> {
    Err(TapError::UnsupportedPlatform)
}

pub fn bind_driver_socket(_socket: &OwnedFd, _device: &str) -> Result<(), TapError> {
    Err(TapError::UnsupportedPlatform)
}

pub fn open_capture_device() -> Result<File, TapError> {
    Err(TapError::UnsupportedPlatform)
}

pub fn configure_capture(_bpf: &File, _device: &str) -> Result<usize, TapError> {
    Err(TapError::UnsupportedPlatform)
}

pub fn apply_ipv6_flags(_device: &str, _enable_nud: bool, _enable_ra: bool) {}
