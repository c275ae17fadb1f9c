//! Bootloader command frames.
//!
//! ## Frame Format
//!
//! Both directions share one header layout inside the SLIP frame:
//!
//! ```text
//! +-----+--------+--------+----------------+---------------+
//! | Dir | Opcode | Length | Checksum/Value |     Data      |
//! +-----+--------+--------+----------------+---------------+
//! | 1   | 1      | 2      | 4              |   variable    |
//! +-----+--------+--------+----------------+---------------+
//! ```
//!
//! Requests carry `Dir = 0x00` and an XOR checksum (only meaningful for
//! `FlashData`); responses carry `Dir = 0x01`, a 32-bit result value, and a
//! trailing status/error byte pair.

use {
    super::slip::slip_encode,
    byteorder::{LittleEndian, WriteBytesExt},
};

/// Request direction byte.
pub const DIR_REQUEST: u8 = 0x00;

/// Response direction byte.
pub const DIR_RESPONSE: u8 = 0x01;

/// Seed for the XOR data checksum.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Number of padding bytes in the sync payload.
const SYNC_PADDING: usize = 32;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Begin a flash write (erase the target region, announce geometry).
    FlashBegin = 0x02,
    /// Stream one block of flash data.
    FlashData = 0x03,
    /// Finish a flash write, optionally staying in the loader.
    FlashEnd = 0x04,
    /// Handshake/synchronization.
    Sync = 0x08,
    /// Read a 32-bit register.
    ReadReg = 0x0A,
    /// Erase the entire flash.
    EraseChip = 0xD0,
}

/// XOR checksum over a data block.
#[must_use]
pub fn data_checksum(data: &[u8]) -> u8 {
    data.iter().fold(CHECKSUM_SEED, |acc, byte| acc ^ byte)
}

/// Command frame builder.
#[derive(Debug)]
pub struct CommandFrame {
    opcode: Opcode,
    checksum: u32,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a new command frame with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            checksum: 0,
            data: Vec::new(),
        }
    }

    /// Create a sync (handshake) command frame.
    pub fn sync() -> Self {
        let mut frame = Self::new(Opcode::Sync);
        frame
            .data
            .extend_from_slice(&[0x07, 0x07, 0x12, 0x20]);
        frame
            .data
            .extend_from_slice(&[0x55; SYNC_PADDING]);
        frame
    }

    /// Create a read-register command frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn read_reg(addr: u32) -> Self {
        let mut frame = Self::new(Opcode::ReadReg);
        frame
            .data
            .write_u32::<LittleEndian>(addr)
            .unwrap();
        frame
    }

    /// Create a flash-begin command frame.
    ///
    /// # Arguments
    ///
    /// * `total_size` - Bytes about to be written to this region.
    /// * `block_count` - Number of data blocks that will follow.
    /// * `block_size` - Size of each data block.
    /// * `offset` - Flash address the region starts at.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn flash_begin(total_size: u32, block_count: u32, block_size: u32, offset: u32) -> Self {
        let mut frame = Self::new(Opcode::FlashBegin);
        frame
            .data
            .write_u32::<LittleEndian>(total_size)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(block_count)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(block_size)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(offset)
            .unwrap();
        frame
    }

    /// Create a flash-data command frame for one block.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)]
    pub fn flash_data(sequence: u32, block: &[u8]) -> Self {
        let mut frame = Self::new(Opcode::FlashData);
        // Safe cast: blocks are bounded by the writer's block size
        frame
            .data
            .write_u32::<LittleEndian>(block.len() as u32)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(sequence)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(0)
            .unwrap();
        frame
            .data
            .write_u32::<LittleEndian>(0)
            .unwrap();
        frame
            .data
            .extend_from_slice(block);
        frame.checksum = u32::from(data_checksum(block));
        frame
    }

    /// Create a flash-end command frame.
    ///
    /// `stay_in_loader` keeps the bootloader running instead of rebooting
    /// into the freshly written firmware.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn flash_end(stay_in_loader: bool) -> Self {
        let mut frame = Self::new(Opcode::FlashEnd);
        frame
            .data
            .write_u32::<LittleEndian>(u32::from(stay_in_loader))
            .unwrap();
        frame
    }

    /// Create an erase-chip command frame.
    pub fn erase_chip() -> Self {
        Self::new(Opcode::EraseChip)
    }

    /// Build the complete SLIP-framed command bytes.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Vec<u8> {
        // Header = Dir(1) + Opcode(1) + Length(2) + Checksum(4)
        let mut buf = Vec::with_capacity(8 + self.data.len());

        buf.push(DIR_REQUEST);
        buf.push(self.opcode as u8);
        // Safe cast: payloads are bounded by the writer's block size
        buf.write_u16::<LittleEndian>(self.data.len() as u16)
            .unwrap();
        buf.write_u32::<LittleEndian>(self.checksum)
            .unwrap();
        buf.extend_from_slice(&self.data);

        slip_encode(&buf)
    }

    /// Get the command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
}

/// Parsed response frame.
#[derive(Debug)]
pub struct ResponseFrame {
    /// Opcode echoed by the device.
    pub opcode: u8,
    /// 32-bit result value (register contents for `ReadReg`).
    pub value: u32,
    /// Status byte (0 = success).
    pub status: u8,
    /// Error detail byte, meaningful when `status` is non-zero.
    pub error: u8,
}

impl ResponseFrame {
    /// Parse a response from a decoded SLIP payload.
    ///
    /// Returns `None` if the payload is not a response frame.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 10 || payload[0] != DIR_RESPONSE {
            return None;
        }

        let opcode = payload[1];
        let len = u16::from_le_bytes([payload[2], payload[3]]) as usize;
        if payload.len() < 8 + len || len < 2 {
            return None;
        }

        let value = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let body = &payload[8..8 + len];
        let status = body[len - 2];
        let error = body[len - 1];

        Some(Self {
            opcode,
            value,
            status,
            error,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{DIR_RESPONSE, Opcode, slip_encode};

    /// Encode a minimal SLIP-framed response for driving the exchange loop
    /// in tests.
    pub(crate) fn encode_response(opcode: Opcode, value: u32, status: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(DIR_RESPONSE);
        buf.push(opcode as u8);
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
        buf.push(status);
        buf.push(0x00);
        slip_encode(&buf)
    }
}
