//! Hex/ASCII dump of frame contents.
//!
//! Used by `--show-data`, the frame-size diagnostics, and the fatal
//! protocol-error path. Dumps go straight to stderr; they are bulk data,
//! not log records.

use std::fmt::Write as _;

const BYTES_PER_LINE: usize = 16;

/// Render `data` as offset-prefixed hex and ASCII columns.
pub fn to_string(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08X} |", line * BYTES_PER_LINE);
        for byte in chunk {
            let _ = write!(out, " {byte:02X}");
        }
        for _ in chunk.len()..BYTES_PER_LINE {
            out.push_str("   ");
        }
        out.push_str(" | ");
        for &byte in chunk {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

/// Print a labeled dump to stderr.
pub fn dump(label: &str, data: &[u8]) {
    eprintln!("\n{label} ({} bytes):\n{}", data.len(), to_string(data));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line_layout() {
        let data: Vec<u8> = (0u8..16).collect();
        let dump = to_string(&data);
        assert!(dump.starts_with("00000000 | 00 01 02 03"));
        assert!(dump.contains("0F"));
        assert!(dump.ends_with("................\n"));
    }

    #[test]
    fn test_partial_line_is_padded() {
        let dump = to_string(b"AB");
        // Hex column padded to 16 slots before the ASCII column.
        assert!(dump.contains("41 42"));
        assert!(dump.contains("| AB\n"), "got: {dump:?}");
    }

    #[test]
    fn test_second_line_offset() {
        let data = vec![0x41u8; 20];
        let dump = to_string(&data);
        assert!(dump.contains("\n00000010 |"), "got: {dump}");
    }

    #[test]
    fn test_empty_input_is_empty() {
        assert_eq!(to_string(&[]), "");
    }
}
