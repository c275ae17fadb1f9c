//! # espinstall
//!
//! A library for running firmware install sessions against ESP-family
//! devices over a serial link.
//!
//! One [`InstallSession`] flashes one device once. It drives the full
//! lifecycle — connect, identify the chip, resolve and validate the compiled
//! firmware, stream it, reset the device — as an explicit state machine with
//! guaranteed teardown on every exit path, including user cancellation and
//! abrupt device disconnection.
//!
//! ## Components
//!
//! - [`transport`]: serial link abstraction with a latched disconnect signal
//! - [`negotiator`]: bounded-retry bootloader handshake and chip detection
//! - [`firmware`]: metadata lookup, platform validation, segment loading
//! - [`writer`]: segment streaming with progress reporting
//! - [`session`]: the orchestrating state machine
//!
//! ## Example
//!
//! ```rust,no_run
//! use espinstall::{DirSource, InstallConfig, InstallSession, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = DirSource::new("build");
//!     let config = InstallConfig::new("garden-sensor", "garden-sensor.yaml");
//!     let serial = SerialConfig::new("/dev/ttyUSB0", 115_200);
//!
//!     let mut session = InstallSession::open(config, &serial)?;
//!     let report = session.run(&source, &mut |progress| {
//!         println!("{progress:?}");
//!     })?;
//!
//!     println!("Flashed {} ({} bytes)", report.chip, report.bytes_written);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod chip;
pub mod discover;
pub mod error;
pub mod firmware;
pub mod negotiator;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    chip::{CHIP_MAGIC_REG, ChipFamily},
    discover::{DetectedPort, UsbBridge, auto_detect_port, detect_device_ports, detect_ports},
    error::{Error, Result},
    firmware::{DirSource, FirmwareMetadata, FirmwareSource, Segment, validate_platform},
    negotiator::Negotiator,
    protocol::{CommandFrame, Opcode, ResponseFrame, SlipDecoder},
    session::{InstallConfig, InstallReport, InstallSession, Phase, PortOwnership},
    transport::{DisconnectWatch, SerialConfig, SerialTransport, Transport},
    writer::{FLASH_BLOCK_SIZE, FlashWriter, Progress},
};
