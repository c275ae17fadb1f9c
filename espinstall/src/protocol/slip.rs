//! SLIP framing (RFC 1055) as used by the bootloader serial protocol.
//!
//! Every command and response travels inside a SLIP frame:
//!
//! ```text
//! +------+------------------------+------+
//! | 0xC0 |  escaped frame payload | 0xC0 |
//! +------+------------------------+------+
//! ```
//!
//! `0xC0` inside the payload is escaped as `0xDB 0xDC`, `0xDB` as `0xDB 0xDD`.

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape introducer.
pub const ESC: u8 = 0xDB;
/// Escaped END.
pub const ESC_END: u8 = 0xDC;
/// Escaped ESC.
pub const ESC_ESC: u8 = 0xDD;

/// Encode a payload into a single SLIP frame.
#[must_use]
pub fn slip_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END);
    for &byte in payload {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(END);
    out
}

/// Incremental SLIP decoder.
///
/// Feed bytes one at a time; a completed frame payload is returned when its
/// closing delimiter arrives. Bytes outside a frame are discarded, which
/// skips boot-ROM chatter between frames.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buffer: Vec<u8>,
    in_frame: bool,
    in_escape: bool,
}

impl SlipDecoder {
    /// Create a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns the decoded payload when a frame completes.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            END => {
                if self.in_frame && !self.buffer.is_empty() {
                    self.in_frame = false;
                    self.in_escape = false;
                    return Some(std::mem::take(&mut self.buffer));
                }
                // Opening delimiter, or an empty frame treated as an opener.
                self.in_frame = true;
                self.buffer.clear();
            },
            ESC if self.in_frame => {
                self.in_escape = true;
            },
            ESC_END if self.in_frame && self.in_escape => {
                self.buffer.push(END);
                self.in_escape = false;
            },
            ESC_ESC if self.in_frame && self.in_escape => {
                self.buffer.push(ESC);
                self.in_escape = false;
            },
            _ if self.in_frame => {
                if self.in_escape {
                    // Invalid escape; keep the literal ESC and continue.
                    self.buffer.push(ESC);
                    self.in_escape = false;
                }
                self.buffer.push(byte);
            },
            _ => {},
        }
        None
    }
}
