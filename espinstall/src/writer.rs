//! Firmware transfer to the device.
//!
//! Segments are streamed strictly in resolver order; the wire protocol is
//! sequential and offset-dependent, so there is no reordering and no
//! parallelism. Progress is reported through a callback as whole-percent
//! steps, never decreasing within a session. A failed transfer is not rolled
//! back: the device may be left partially flashed, and the error says so.

use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::firmware::Segment;
use crate::protocol::{CommandFrame, exchange};
use crate::transport::Transport;

/// Size of one flash data block on the wire.
pub const FLASH_BLOCK_SIZE: usize = 1024;

/// Timeout for a single data-block exchange.
const BLOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for a flash-begin exchange (the device erases the target region
/// before acknowledging).
const BEGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a full-chip erase.
const ERASE_TIMEOUT: Duration = Duration::from_secs(120);

/// Progress observed during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Work is happening but completion cannot be estimated (full-chip
    /// erase).
    Indeterminate,
    /// Fraction of the transfer completed, 0–100.
    Percent(u8),
}

/// Streams firmware segments through a transport.
pub struct FlashWriter {
    block_timeout: Duration,
    begin_timeout: Duration,
    erase_timeout: Duration,
}

impl Default for FlashWriter {
    fn default() -> Self {
        Self {
            block_timeout: BLOCK_TIMEOUT,
            begin_timeout: BEGIN_TIMEOUT,
            erase_timeout: ERASE_TIMEOUT,
        }
    }
}

impl FlashWriter {
    /// Create a writer with default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override all exchange timeouts, for fast feedback loops.
    #[must_use]
    pub fn with_timeouts(mut self, block: Duration, begin: Duration, erase: Duration) -> Self {
        self.block_timeout = block;
        self.begin_timeout = begin;
        self.erase_timeout = erase;
        self
    }

    /// Write `segments` to the device, in order.
    ///
    /// When `erase_first` is set, a full-chip erase runs before any data and
    /// progress is indeterminate for its duration. Returns the number of
    /// bytes written.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        segments: &[Segment],
        erase_first: bool,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<usize> {
        let segments_total = segments.len();
        let total_bytes: usize = segments.iter().map(Segment::len).sum();
        let mut written_bytes = 0usize;
        let mut segments_written = 0usize;
        let mut last_percent = 0u8;

        if erase_first {
            info!("Erasing entire flash (this can take a while)...");
            progress(Progress::Indeterminate);
            exchange(transport, &CommandFrame::erase_chip(), self.erase_timeout)
                .map_err(|e| transfer_error(0, segments_total, e))?;
            debug!("Flash erased");
        }

        progress(Progress::Percent(0));

        for segment in segments {
            // Safe casts: firmware images are always < 4GB
            let length = segment.len() as u32;
            let block_count = segment.len().div_ceil(FLASH_BLOCK_SIZE) as u32;
            debug!(
                "Writing segment 0x{:08X} ({} bytes, {block_count} blocks)",
                segment.offset,
                segment.len()
            );

            exchange(
                transport,
                &CommandFrame::flash_begin(
                    length,
                    block_count,
                    FLASH_BLOCK_SIZE as u32,
                    segment.offset,
                ),
                self.begin_timeout,
            )
            .map_err(|e| transfer_error(segments_written, segments_total, e))?;

            for (sequence, block) in segment.data.chunks(FLASH_BLOCK_SIZE).enumerate() {
                if crate::is_interrupt_requested() {
                    return Err(Error::Interrupted);
                }

                exchange(
                    transport,
                    &CommandFrame::flash_data(sequence as u32, block),
                    self.block_timeout,
                )
                .map_err(|e| transfer_error(segments_written, segments_total, e))?;

                written_bytes += block.len();
                let percent = if total_bytes == 0 {
                    100
                } else {
                    (written_bytes * 100 / total_bytes) as u8
                };
                if percent > last_percent {
                    last_percent = percent;
                    progress(Progress::Percent(percent));
                }
            }

            segments_written += 1;
        }

        exchange(
            transport,
            &CommandFrame::flash_end(true),
            self.block_timeout,
        )
        .map_err(|e| transfer_error(segments_written, segments_total, e))?;

        info!("Transfer complete ({written_bytes} bytes)");
        Ok(written_bytes)
    }
}

fn transfer_error(segments_written: usize, segments_total: usize, source: Error) -> Error {
    Error::Transfer {
        segments_written,
        segments_total,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;
    use crate::transport::mock::MockTransport;

    fn fast_writer() -> FlashWriter {
        FlashWriter::new().with_timeouts(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    fn segment(offset: u32, len: usize) -> Segment {
        Segment {
            offset,
            data: vec![0x5A; len],
        }
    }

    #[test]
    fn test_progress_is_monotonic_and_reaches_100() {
        let mut transport = MockTransport::new();
        transport.respond(Opcode::FlashBegin, 0);
        transport.respond_n(Opcode::FlashData, 0, 3);
        transport.respond(Opcode::FlashEnd, 0);

        let segments = [segment(0x1000, 2 * FLASH_BLOCK_SIZE + 512)];
        let mut observed = Vec::new();
        let written = fast_writer()
            .write(&mut transport, &segments, false, &mut |p| observed.push(p))
            .unwrap();

        assert_eq!(written, 2 * FLASH_BLOCK_SIZE + 512);

        let percents: Vec<u8> = observed
            .iter()
            .filter_map(|p| match p {
                Progress::Percent(v) => Some(*v),
                Progress::Indeterminate => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
        assert!(!observed.contains(&Progress::Indeterminate));
    }

    #[test]
    fn test_erase_first_reports_indeterminate_before_percentages() {
        let mut transport = MockTransport::new();
        transport.respond(Opcode::EraseChip, 0);
        transport.respond(Opcode::FlashBegin, 0);
        transport.respond(Opcode::FlashData, 0);
        transport.respond(Opcode::FlashEnd, 0);

        let segments = [segment(0x0000, 100)];
        let mut observed = Vec::new();
        fast_writer()
            .write(&mut transport, &segments, true, &mut |p| observed.push(p))
            .unwrap();

        assert_eq!(observed.first(), Some(&Progress::Indeterminate));
        assert_eq!(observed.last(), Some(&Progress::Percent(100)));
    }

    #[test]
    fn test_transfer_failure_reports_segments_written() {
        let mut transport = MockTransport::new();
        // Two full segments succeed, the third gets no flash-begin ack.
        for _ in 0..2 {
            transport.respond(Opcode::FlashBegin, 0);
            transport.respond(Opcode::FlashData, 0);
        }

        let segments: Vec<Segment> = (0..5).map(|i| segment(i * 0x1000, 64)).collect();
        let err = fast_writer()
            .write(&mut transport, &segments, false, &mut |_| {})
            .unwrap_err();

        match err {
            Error::Transfer {
                segments_written,
                segments_total,
                ..
            } => {
                assert_eq!(segments_written, 2);
                assert_eq!(segments_total, 5);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_segments_stream_in_order() {
        let mut transport = MockTransport::new();
        // Queue order only works because the writer is strictly sequential:
        // begin(seg0), data, begin(seg1), data, end.
        transport.respond(Opcode::FlashBegin, 0);
        transport.respond(Opcode::FlashData, 0);
        transport.respond(Opcode::FlashBegin, 0);
        transport.respond(Opcode::FlashData, 0);
        transport.respond(Opcode::FlashEnd, 0);

        let segments = [segment(0x2000, 16), segment(0x8000, 16)];
        fast_writer()
            .write(&mut transport, &segments, false, &mut |_| {})
            .unwrap();

        // Decode the outgoing stream and check the flash-begin offsets
        // arrive in resolver order.
        let mut decoder = crate::protocol::SlipDecoder::new();
        let offsets: Vec<u32> = transport
            .written
            .iter()
            .filter_map(|&b| decoder.feed(b))
            .filter(|frame| frame.get(1) == Some(&(Opcode::FlashBegin as u8)))
            .map(|frame| u32::from_le_bytes([frame[20], frame[21], frame[22], frame[23]]))
            .collect();
        assert_eq!(offsets, vec![0x2000, 0x8000]);
    }
}
