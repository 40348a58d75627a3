//! Client stream framing.
//!
//! The client socket carries either bare Ethernet frames (boundaries found by
//! the frame-size classifier) or frames preceded by a 16-bit native-byte-order
//! length. The decoder accumulates stream bytes and yields complete frames;
//! the trailing partial frame stays buffered until more bytes arrive.

use crate::error::TapError;
use crate::frame::{self, FrameSize};

/// Wire format used on the client socket, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Frame boundaries are inferred from the frame contents.
    SelfDelimited,
    /// Each frame is preceded by a 16-bit native-byte-order length.
    LengthPrefixed,
}

/// Size of the length prefix in [`Framing::LengthPrefixed`] mode.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// A frame extracted from the client stream.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The frame payload, exactly as it should be injected.
    pub data: Vec<u8>,
    /// Classifier verdict for `data`. In self-delimited mode this always
    /// agrees with `data.len()`; in length-prefixed mode a disagreement is
    /// diagnostic only — the declared length is authoritative.
    pub computed: FrameSize,
}

impl DecodedFrame {
    /// True when the classifier's size disagrees with the actual length.
    pub fn size_mismatch(&self) -> bool {
        self.computed != FrameSize::Complete(self.data.len())
    }
}

/// Incremental decoder over the client byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Append freshly read stream bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered, including any trailing partial frame.
    /// Exposed so a fatal protocol error can dump the offending data.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Extract the next complete frame, or `None` if the buffer holds only a
    /// partial frame. In self-delimited mode an unclassifiable prefix is a
    /// fatal protocol error: without a size there is no frame boundary.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>, TapError> {
        // A length prefix is 2 bytes and no classifiable frame is shorter,
        // so fewer than 2 buffered bytes can never produce a frame.
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        match self.framing {
            Framing::LengthPrefixed => {
                let declared = u16::from_ne_bytes([self.buf[0], self.buf[1]]) as usize;
                let total = LENGTH_PREFIX_LEN + declared;
                if self.buf.len() < total {
                    return Ok(None);
                }
                let data = self.buf[LENGTH_PREFIX_LEN..total].to_vec();
                self.buf.drain(..total);
                let computed = frame::frame_size(&data);
                Ok(Some(DecodedFrame { data, computed }))
            }

            Framing::SelfDelimited => match frame::frame_size(&self.buf) {
                FrameSize::Incomplete => Ok(None),
                FrameSize::Unsupported => Err(TapError::UnknownFrameSize),
                FrameSize::Complete(size) => {
                    if self.buf.len() < size {
                        return Ok(None);
                    }
                    let data = self.buf[..size].to_vec();
                    self.buf.drain(..size);
                    Ok(Some(DecodedFrame {
                        data,
                        computed: FrameSize::Complete(size),
                    }))
                }
            },
        }
    }
}

/// Encode one outbound frame into `out`, which is written to the client as a
/// single unit.
pub fn encode(framing: Framing, frame: &[u8], out: &mut Vec<u8>) {
    if framing == Framing::LengthPrefixed {
        out.extend_from_slice(&(frame.len() as u16).to_ne_bytes());
    }
    out.extend_from_slice(frame);
}
