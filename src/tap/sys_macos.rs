//! macOS kernel plumbing for the tap endpoints.
//!
//! Frame injection goes through a raw `AF_NDRV` socket bound and connected to
//! the io-side endpoint; capture comes from a `/dev/bpf*` device attached to
//! the same endpoint. `sockaddr_ndrv` and the IPv6 neighbor-discovery
//! structures are not exposed by the libc crate, so they are declared here
//! mirroring the kernel headers.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::config;
use crate::error::TapError;

/// net/ndrv.h: name-addressed sockaddr for the network-driver family.
#[repr(C)]
struct SockaddrNdrv {
    snd_len: u8,
    snd_family: u8,
    snd_name: [u8; libc::IFNAMSIZ],
}

/// netinet6/nd6.h: per-interface neighbor-discovery state.
#[repr(C)]
struct NdIfinfo {
    linkmtu: u32,
    maxmtu: u32,
    basereachable: u32,
    reachable: u32,
    retrans: u32,
    flags: u32,
    recalctm: i32,
    chlim: u8,
    receivedra: u8,
}

#[repr(C)]
struct In6Ndireq {
    ifname: [u8; libc::IFNAMSIZ],
    ndi: NdIfinfo,
}

/// netinet6/in6_var.h: in6_ifreq, with the request union declared as raw
/// bytes sized to its largest member (struct icmp6_ifstat).
const IN6_IFREQ_UNION_LEN: usize = 272;

#[repr(C)]
struct In6Ifreq {
    ifr_name: [u8; libc::IFNAMSIZ],
    ifr_ifru: [u8; IN6_IFREQ_UNION_LEN],
}

const ND6_IFF_PERFORMNUD: u32 = 0x1;

mod ioctls {
    use super::{In6Ifreq, In6Ndireq};
    use nix::{ioctl_none, ioctl_readwrite, ioctl_write_ptr};

    // net/bpf.h
    ioctl_readwrite!(biocsblen, b'B', 102, libc::c_uint);
    ioctl_none!(biocpromisc, b'B', 105);
    ioctl_write_ptr!(biocsetif, b'B', 108, libc::ifreq);
    ioctl_write_ptr!(biocimmediate, b'B', 112, libc::c_uint);
    ioctl_write_ptr!(biocshdrcmplt, b'B', 117, libc::c_uint);
    ioctl_write_ptr!(biocsseesent, b'B', 119, libc::c_uint);

    // netinet6/nd6.h, netinet6/in6_var.h
    ioctl_readwrite!(siocgifinfo_in6, b'i', 76, In6Ndireq);
    ioctl_readwrite!(siocsifinfo_flags, b'i', 87, In6Ndireq);
    ioctl_readwrite!(siocautoconf_start, b'i', 132, In6Ifreq);
    ioctl_readwrite!(siocautoconf_stop, b'i', 133, In6Ifreq);
}

fn setup_error(action: &'static str) -> impl Fn(nix::errno::Errno) -> TapError {
    move |errno| TapError::CaptureSetup {
        action,
        source: io::Error::from(errno),
    }
}

/// Copy an interface name into a fixed kernel name buffer, NUL-terminated.
fn copy_name(name: &str, buf: &mut [u8]) -> Result<(), TapError> {
    if name.len() + 1 > buf.len() {
        return Err(TapError::NameTooLong {
            name: name.to_string(),
            max: buf.len() - 1,
        });
    }
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

/// Open the raw network-driver socket used for frame injection.
pub fn open_driver_socket() -> Result<OwnedFd, TapError> {
    // SAFETY: plain socket(2); the descriptor is wrapped immediately.
    let fd = unsafe { libc::socket(libc::AF_NDRV, libc::SOCK_RAW, 0) };
    if fd < 0 {
        return Err(TapError::DriverSocket {
            action: "open",
            source: io::Error::last_os_error(),
        });
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind and connect the driver socket to `device`. Both are required so
/// subsequent writes inject onto the link without naming a destination.
pub fn bind_driver_socket(socket: &OwnedFd, device: &str) -> Result<(), TapError> {
    let mut addr: SockaddrNdrv = unsafe { mem::zeroed() };
    addr.snd_len = mem::size_of::<SockaddrNdrv>() as u8;
    addr.snd_family = libc::AF_NDRV as u8;
    copy_name(device, &mut addr.snd_name)?;

    let addr_ptr = &addr as *const SockaddrNdrv as *const libc::sockaddr;
    let addr_len = mem::size_of::<SockaddrNdrv>() as libc::socklen_t;

    // SAFETY: addr is a properly initialized sockaddr_ndrv of the stated length.
    if unsafe { libc::bind(socket.as_raw_fd(), addr_ptr, addr_len) } != 0 {
        return Err(TapError::DriverSocket {
            action: "bind",
            source: io::Error::last_os_error(),
        });
    }
    if unsafe { libc::connect(socket.as_raw_fd(), addr_ptr, addr_len) } != 0 {
        return Err(TapError::DriverSocket {
            action: "connect",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Scan `/dev/bpf0`, `/dev/bpf1`, … read-write; the first open that succeeds
/// wins. Busy or denied nodes are skipped; the scan ends at the first node
/// that does not exist.
pub fn open_capture_device() -> Result<File, TapError> {
    for index in 0..config::BPF_SCAN_LIMIT {
        let path = format!("/dev/bpf{index}");
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => tracing::debug!("skipping {path}: {e}"),
        }
    }
    Err(TapError::NoCaptureDevice)
}

/// Configure the capture device and attach it to `device`. Returns the
/// buffer size the kernel granted, which is the size every subsequent read
/// must request.
pub fn configure_capture(bpf: &File, device: &str) -> Result<usize, TapError> {
    let fd: RawFd = bpf.as_raw_fd();

    let mut buffer_len: libc::c_uint = config::BPF_BUFFER_SIZE;
    unsafe { ioctls::biocsblen(fd, &mut buffer_len) }
        .map_err(setup_error("set receive buffer size"))?;

    // Reads return as soon as any frame arrives instead of waiting to batch.
    let immediate: libc::c_uint = 1;
    unsafe { ioctls::biocimmediate(fd, &immediate) }
        .map_err(setup_error("enable immediate mode"))?;

    // Do not loop our own injections back into the capture stream.
    let see_sent: libc::c_uint = 0;
    unsafe { ioctls::biocsseesent(fd, &see_sent) }
        .map_err(setup_error("disable sent frame availability"))?;

    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    if device.len() + 1 > ifr.ifr_name.len() {
        return Err(TapError::NameTooLong {
            name: device.to_string(),
            max: ifr.ifr_name.len() - 1,
        });
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(device.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    unsafe { ioctls::biocsetif(fd, &ifr) }.map_err(setup_error("attach to interface"))?;

    // Kernel fills in the source MAC on injected frames.
    let header_complete: libc::c_uint = 1;
    unsafe { ioctls::biocshdrcmplt(fd, &header_complete) }
        .map_err(setup_error("enable header autocomplete"))?;

    unsafe { ioctls::biocpromisc(fd) }.map_err(setup_error("enable promiscuous mode"))?;

    Ok(buffer_len as usize)
}

/// Toggle IPv6 neighbor-unreachability detection and router-advertisement
/// acceptance on `device`. Best-effort: every failure is a warning, and the
/// interface keeps whatever flags the kernel accepted.
pub fn apply_ipv6_flags(device: &str, enable_nud: bool, enable_ra: bool) {
    let raw = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
    if raw < 0 {
        tracing::warn!("cannot create IPv6 socket for setting flags");
        return;
    }
    let socket = unsafe { OwnedFd::from_raw_fd(raw) };
    let fd = socket.as_raw_fd();

    let mut nd: In6Ndireq = unsafe { mem::zeroed() };
    if copy_name(device, &mut nd.ifname).is_err() {
        tracing::warn!("cannot set IPv6 flags: device name too long");
        return;
    }
    if unsafe { ioctls::siocgifinfo_in6(fd, &mut nd) }.is_err() {
        tracing::warn!("cannot get IPv6 behavior flags");
        return;
    }

    let original_flags = nd.ndi.flags;
    if enable_nud {
        nd.ndi.flags |= ND6_IFF_PERFORMNUD;
    } else {
        nd.ndi.flags &= !ND6_IFF_PERFORMNUD;
    }
    if original_flags != nd.ndi.flags {
        if let Err(e) = unsafe { ioctls::siocsifinfo_flags(fd, &mut nd) } {
            tracing::warn!(
                "cannot {} IPv6 neighbor unreachability detection: {e}",
                if enable_nud { "enable" } else { "disable" },
            );
            return;
        }
    }

    let mut ifr: In6Ifreq = unsafe { mem::zeroed() };
    if copy_name(device, &mut ifr.ifr_name).is_err() {
        return;
    }
    let result = if enable_ra {
        unsafe { ioctls::siocautoconf_start(fd, &mut ifr) }
    } else {
        unsafe { ioctls::siocautoconf_stop(fd, &mut ifr) }
    };
    if let Err(e) = result {
        tracing::warn!(
            "cannot {} IPv6 router advertisements: {e}",
            if enable_ra { "enable" } else { "disable" },
        );
    }
}
