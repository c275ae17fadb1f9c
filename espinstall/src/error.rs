//! Error types for espinstall.

use std::io;
use thiserror::Error;

/// Result type for espinstall operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espinstall operations.
///
/// The `Connection`, `Initialization`, `MetadataUnavailable`,
/// `PlatformMismatch`, `Preparation`, `Transfer` and `Disconnected` variants
/// are terminal for an install session: none of them triggers an internal
/// retry, and the caller must start a new session to try again.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Unexpected or malformed device response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The serial port could not be opened (in use, permission denied,
    /// not present).
    #[error("Cannot open port: {0}")]
    Connection(String),

    /// The bootloader handshake did not complete within its retry budget,
    /// or the device reported an unrecognized chip identity.
    #[error("Device initialization failed: {0}")]
    Initialization(String),

    /// Firmware metadata for the device could not be fetched.
    #[error("Firmware metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// The firmware's declared platform does not match the chip the device
    /// reported. Requires a different device or a different configuration.
    #[error(
        "Platform mismatch: the firmware targets \"{declared}\" but the connected \
         device is \"{negotiated}\""
    )]
    PlatformMismatch {
        /// Platform declared by the compiled firmware.
        declared: String,
        /// Platform negotiated with the connected device.
        negotiated: String,
    },

    /// The firmware artifact could not be prepared for streaming. The
    /// underlying cause is preserved for diagnostic display.
    #[error("Firmware preparation failed")]
    Preparation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The firmware transfer aborted partway through. The device's flash
    /// contents may be left in an inconsistent state.
    #[error(
        "Transfer failed after {segments_written} of {segments_total} segments; \
         the device may be left in a partially flashed state"
    )]
    Transfer {
        /// Segments fully written before the fault.
        segments_written: usize,
        /// Total segments that were scheduled.
        segments_total: usize,
        /// First I/O or protocol fault encountered.
        #[source]
        source: Box<Error>,
    },

    /// The device vanished from the bus mid-session.
    #[error("Device disconnected")]
    Disconnected,

    /// The operation was cancelled by the embedding application.
    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error means the device's flash contents may be
    /// inconsistent and a re-flash is advised.
    #[must_use]
    pub fn leaves_partial_flash(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_mismatch_reports_both_values() {
        let err = Error::PlatformMismatch {
            declared: "ESP32".to_string(),
            negotiated: "ESP8266".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ESP32"));
        assert!(msg.contains("ESP8266"));
    }

    #[test]
    fn test_transfer_error_names_partial_flash_risk() {
        let err = Error::Transfer {
            segments_written: 2,
            segments_total: 5,
            source: Box::new(Error::Timeout("no ack".into())),
        };
        assert!(err.leaves_partial_flash());
        assert!(err.to_string().contains("partially flashed"));
    }

    #[test]
    fn test_preparation_error_exposes_cause() {
        use std::error::Error as _;

        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "firmware.bin missing");
        let err = Error::Preparation(Box::new(cause));
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("firmware.bin missing"));
    }
}
