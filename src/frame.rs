//! Ethernet frame size classification.
//!
//! Computes the total length of an Ethernet II frame from its leading bytes,
//! so a non-self-delimiting byte stream can be split into frames. All
//! protocol fields are decoded byte-wise (network byte order); nothing here
//! assumes the input is aligned or even a valid frame — a corrupt payload may
//! yield a garbage size, which is the caller's concern.

/// Ethernet II header: 6-byte destination, 6-byte source, 2-byte ethertype.
pub const ETHER_HEADER_LEN: usize = 14;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Verdict of the classifier for a byte sequence presumed to start with an
/// Ethernet II header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// Total frame length in bytes, Ethernet header included.
    Complete(usize),
    /// Not enough bytes yet to read the headers that determine the length.
    Incomplete,
    /// The ethertype (outer or VLAN-inner) is not one we can size.
    Unsupported,
}

/// Computes the total size of the frame starting at `data[0]`.
///
/// Trailing bytes beyond the frame are ignored; the caller is expected to
/// pass an accumulation buffer that may hold parts of subsequent frames.
pub fn frame_size(data: &[u8]) -> FrameSize {
    if data.len() < ETHER_HEADER_LEN {
        return FrameSize::Incomplete;
    }
    let ether_type = u16::from_be_bytes([data[12], data[13]]);
    match payload_size(ether_type, &data[ETHER_HEADER_LEN..]) {
        FrameSize::Complete(inner) => FrameSize::Complete(ETHER_HEADER_LEN + inner),
        other => other,
    }
}

/// Size of the payload following an Ethernet (or VLAN) header carrying
/// `ether_type`, per-protocol:
///
/// - IPv4: the Total Length header field.
/// - IPv6: the 40-byte fixed header plus the Payload Length field.
/// - ARP: 8-byte header plus two hardware and two protocol addresses.
/// - 802.1Q: the tagged inner frame plus the 4-byte tag.
fn payload_size(ether_type: u16, payload: &[u8]) -> FrameSize {
    match ether_type {
        ETHERTYPE_IPV4 => {
            if payload.len() < 20 {
                return FrameSize::Incomplete;
            }
            FrameSize::Complete(u16::from_be_bytes([payload[2], payload[3]]) as usize)
        }

        ETHERTYPE_IPV6 => {
            if payload.len() < 40 {
                return FrameSize::Incomplete;
            }
            let payload_len = u16::from_be_bytes([payload[4], payload[5]]) as usize;
            FrameSize::Complete(40 + payload_len)
        }

        ETHERTYPE_ARP => {
            // hardware type (2), protocol type (2), hlen (1), plen (1),
            // operation (2), then sender/target hardware+protocol addresses.
            if payload.len() < 8 {
                return FrameSize::Incomplete;
            }
            let hlen = payload[4] as usize;
            let plen = payload[5] as usize;
            FrameSize::Complete(8 + 2 * (hlen + plen))
        }

        ETHERTYPE_VLAN => {
            if payload.len() < 4 {
                return FrameSize::Incomplete;
            }
            let inner_type = u16::from_be_bytes([payload[2], payload[3]]);
            match payload_size(inner_type, &payload[4..]) {
                FrameSize::Complete(inner) => FrameSize::Complete(4 + inner),
                other => other,
            }
        }

        // RARP, AppleTalk, AppleTalk ARP, IPX, loopback: recognized but not
        // sizable, like everything else we don't understand.
        _ => FrameSize::Unsupported,
    }
}
