//! Chip identification handshake.
//!
//! The negotiator drives the bootloader sync sequence over an already-open
//! transport, then reads the chip-detect magic word and maps it to a
//! [`ChipFamily`]. Retries happen only here, inside a bounded budget; once
//! the budget is exhausted the failure is terminal for the session and the
//! caller must start over (typically after a physical reset).

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::chip::{CHIP_MAGIC_REG, ChipFamily};
use crate::error::{Error, Result};
use crate::protocol::{CommandFrame, exchange};
use crate::transport::Transport;

/// Handshake rounds before giving up.
const MAX_HANDSHAKE_ROUNDS: usize = 7;

/// Sync commands sent per round.
const MAX_SYNC_ATTEMPTS: usize = 5;

/// Timeout for a single sync exchange.
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for the chip-identity register read.
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between handshake rounds.
const ROUND_DELAY: Duration = Duration::from_millis(500);

/// Bounded-retry chip identification.
pub struct Negotiator {
    rounds: usize,
    sync_attempts: usize,
    sync_timeout: Duration,
    round_delay: Duration,
    expected: Option<ChipFamily>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self {
            rounds: MAX_HANDSHAKE_ROUNDS,
            sync_attempts: MAX_SYNC_ATTEMPTS,
            sync_timeout: SYNC_TIMEOUT,
            round_delay: ROUND_DELAY,
            expected: None,
        }
    }
}

impl Negotiator {
    /// Create a negotiator with the default retry budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chip family the caller expects to find.
    ///
    /// Advisory only: a mismatch is logged, but authority stays with the
    /// negotiated identity (platform validation happens against it later).
    #[must_use]
    pub fn with_expected(mut self, expected: Option<ChipFamily>) -> Self {
        self.expected = expected;
        self
    }

    /// Override the handshake retry budget.
    #[must_use]
    pub fn with_budget(mut self, rounds: usize, sync_attempts: usize) -> Self {
        self.rounds = rounds;
        self.sync_attempts = sync_attempts;
        self
    }

    /// Override the handshake timing, for fast feedback loops.
    #[must_use]
    pub fn with_timing(mut self, sync_timeout: Duration, round_delay: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self.round_delay = round_delay;
        self
    }

    /// Identify the chip connected through `transport`.
    ///
    /// The transport must already be open. No state beyond bytes on the wire
    /// is touched; ownership of the transport stays with the caller.
    pub fn identify<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<ChipFamily> {
        info!("Synchronizing with bootloader on {}...", transport.name());

        // Keep reads snappy while the sync frames are spammed; restore the
        // caller's timeout before the slower register read.
        let previous_timeout = transport.timeout();
        transport.set_timeout(self.sync_timeout)?;
        let handshake = self.handshake(transport);
        let _ = transport.set_timeout(previous_timeout);
        handshake?;

        let magic = exchange(
            transport,
            &CommandFrame::read_reg(CHIP_MAGIC_REG),
            READ_TIMEOUT,
        )
        .map_err(|e| Error::Initialization(format!("chip identity read failed: {e}")))?
        .value;

        debug!("Chip magic word: 0x{magic:08X}");

        let family = ChipFamily::from_magic(magic).ok_or_else(|| {
            Error::Initialization(format!("unrecognized chip magic word 0x{magic:08X}"))
        })?;

        if let Some(expected) = self.expected {
            if expected != family {
                warn!("Expected {expected} but the device identifies as {family}");
            }
        }

        info!("Detected {family}");
        Ok(family)
    }

    fn handshake<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<()> {
        let mut hard_fault: Option<Error> = None;

        for round in 1..=self.rounds {
            if round > 1 {
                debug!("Handshake round {round}/{}", self.rounds);
                thread::sleep(self.round_delay);
            }

            if let Err(e) = transport.clear_buffers() {
                hard_fault = Some(e);
                continue;
            }

            match self.sync_once(transport) {
                Ok(()) => return Ok(()),
                Err(Error::Timeout(_)) => {},
                Err(e) => {
                    debug!("Handshake fault (round {round}): {e}");
                    hard_fault = Some(e);
                },
            }
        }

        Err(match hard_fault {
            Some(fault) => Error::Initialization(format!(
                "handshake failed after {} rounds: {fault}",
                self.rounds
            )),
            // The port answered I/O but the device stayed silent.
            None => Error::Initialization(format!(
                "no handshake response after {} rounds; press the reset button \
                 to put the device into bootloader mode and try again",
                self.rounds
            )),
        })
    }

    fn sync_once<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<()> {
        let mut last = Error::Timeout("sync never attempted".into());

        for _ in 0..self.sync_attempts {
            match exchange(transport, &CommandFrame::sync(), self.sync_timeout) {
                Ok(_) => return Ok(()),
                Err(e @ Error::Timeout(_)) => last = e,
                Err(e) => return Err(e),
            }
        }

        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;
    use crate::transport::mock::MockTransport;

    fn fast_negotiator() -> Negotiator {
        Negotiator::new()
            .with_budget(2, 1)
            .with_timing(Duration::from_millis(10), Duration::ZERO)
    }

    #[test]
    fn test_identify_detects_esp32() {
        let mut transport = MockTransport::new();
        transport.respond(Opcode::Sync, 0);
        transport.respond(Opcode::ReadReg, 0x00F0_1D83);

        let family = fast_negotiator().identify(&mut transport).unwrap();
        assert_eq!(family, ChipFamily::Esp32);
    }

    #[test]
    fn test_identify_detects_esp8266() {
        let mut transport = MockTransport::new();
        transport.respond(Opcode::Sync, 0);
        transport.respond(Opcode::ReadReg, 0xFFF0_C101);

        let family = fast_negotiator().identify(&mut transport).unwrap();
        assert_eq!(family, ChipFamily::Esp8266);
    }

    #[test]
    fn test_identify_exhausts_budget_with_reset_hint() {
        let mut transport = MockTransport::new();

        let err = fast_negotiator().identify(&mut transport).unwrap_err();
        match err {
            Error::Initialization(msg) => {
                assert!(msg.contains("reset"), "missing reset hint: {msg}");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_identify_rejects_unknown_magic() {
        let mut transport = MockTransport::new();
        transport.respond(Opcode::Sync, 0);
        transport.respond(Opcode::ReadReg, 0x1234_5678);

        let err = fast_negotiator().identify(&mut transport).unwrap_err();
        match err {
            Error::Initialization(msg) => assert!(msg.contains("magic")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_identify_reports_hard_faults_without_reset_hint() {
        let mut transport = MockTransport::new();
        transport.unplug();

        let err = fast_negotiator().identify(&mut transport).unwrap_err();
        match err {
            Error::Initialization(msg) => {
                assert!(!msg.contains("press the reset button"), "{msg}");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
