//! Transport abstraction over the serial link to a device.
//!
//! The [`Transport`] trait separates I/O from protocol logic: the negotiator
//! and flash writer speak frames, the transport moves bytes. One native
//! implementation exists ([`SerialTransport`], via the `serialport` crate);
//! sessions accept any implementation, which is how tests drive the state
//! machine against scripted hardware.
//!
//! ## Disconnect notification
//!
//! A device can vanish from the bus at any moment, racing whatever operation
//! is in flight. Each transport carries a [`DisconnectWatch`]: a latched,
//! cheaply cloneable signal the implementation raises the instant an I/O
//! operation reveals the device is gone. Sessions register the watch before
//! any phase begins and treat a raised latch as authoritative.

pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::Result;

/// Serial link configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Default baud rate for install sessions.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Latched disconnect signal shared between a transport and its session.
///
/// Once raised it stays raised; the handle it belongs to is no longer
/// usable for writes.
#[derive(Debug, Clone, Default)]
pub struct DisconnectWatch {
    fired: Arc<AtomicBool>,
}

impl DisconnectWatch {
    /// Create a new, un-raised watch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the disconnect has been observed.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Raise the latch. Called by transport implementations when an I/O
    /// operation reveals the device is gone.
    pub fn raise(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }
}

/// Duplex byte-stream over a serial link.
///
/// Implementations own the open/close lifecycle of the underlying resource.
/// `close` is the only way to release the OS-level handle; whoever opens a
/// transport must guarantee a matching close on every exit path.
pub trait Transport: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Whether the handle is still usable for I/O.
    fn is_connected(&self) -> bool;

    /// The disconnect signal for this handle.
    fn disconnect_watch(&self) -> DisconnectWatch;

    /// Close the transport and release the underlying resource.
    ///
    /// Idempotent: calling this twice is safe and the second call does
    /// nothing. Safe to invoke while an operation is logically in progress.
    fn close(&mut self) -> Result<()>;
}

// Re-export the native implementation
pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_watch_latches() {
        let watch = DisconnectWatch::new();
        let clone = watch.clone();
        assert!(!watch.fired());

        clone.raise();
        assert!(watch.fired());
        assert!(clone.fired());
    }

    #[test]
    fn test_serial_config_builder() {
        let config =
            SerialConfig::new("/dev/ttyUSB0", 921_600).with_timeout(Duration::from_secs(5));
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 921_600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
