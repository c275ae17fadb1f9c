//! Bootloader wire protocol.
//!
//! One place owns the wire format shared by the negotiator and the flash
//! writer: SLIP framing, command frame layout, and the request/response
//! exchange loop.

pub mod command;
pub mod slip;

// Re-export common types
pub use command::{CommandFrame, Opcode, ResponseFrame, data_checksum};
pub use slip::{SlipDecoder, slip_encode};

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Send a command frame and wait for the matching response.
///
/// Stale frames (boot chatter, responses to earlier commands) are skipped.
/// A response with a non-zero status byte is a protocol fault.
pub fn exchange<P>(port: &mut P, frame: &CommandFrame, timeout: Duration) -> Result<ResponseFrame>
where
    P: Read + Write + ?Sized,
{
    trace!("Sending command {:?}", frame.opcode());
    port.write_all(&frame.build())?;
    port.flush()?;

    let deadline = Instant::now() + timeout;
    let mut decoder = SlipDecoder::new();

    loop {
        let raw = read_frame(port, &mut decoder, deadline, frame.opcode())?;

        match ResponseFrame::parse(&raw) {
            Some(response) if response.opcode == frame.opcode() as u8 => {
                if response.status != 0 {
                    return Err(Error::Protocol(format!(
                        "{:?} rejected by device (status 0x{:02X}, error 0x{:02X})",
                        frame.opcode(),
                        response.status,
                        response.error,
                    )));
                }
                return Ok(response);
            },
            Some(response) => {
                trace!("Skipping stale response for opcode 0x{:02X}", response.opcode);
            },
            None => {
                trace!("Skipping undecodable frame ({} bytes)", raw.len());
            },
        }
    }
}

/// Read one complete SLIP frame, honoring the deadline.
fn read_frame<P>(
    port: &mut P,
    decoder: &mut SlipDecoder,
    deadline: Instant,
    opcode: Opcode,
) -> Result<Vec<u8>>
where
    P: Read + ?Sized,
{
    let mut byte = [0u8; 1];

    loop {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!("no response to {opcode:?}")));
        }

        match port.read(&mut byte) {
            Ok(1) => {
                if let Some(frame) = decoder.feed(byte[0]) {
                    return Ok(frame);
                }
            },
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
