//! Native serial transport using the `serialport` crate.

use std::io::{Read, Write};
use std::time::Duration;

use log::trace;
use serialport::ClearBuffer;

use crate::error::{Error, Result};
use crate::transport::{DisconnectWatch, SerialConfig, Transport};

/// Native serial transport implementation.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    watch: DisconnectWatch,
}

impl SerialTransport {
    /// Open a serial port with the given configuration.
    ///
    /// Open failures (port in use, permission denied, not present) surface
    /// as [`Error::Connection`].
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|e| Error::Connection(format!("{}: {e}", config.port_name)))?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
            watch: DisconnectWatch::new(),
        })
    }

    fn closed_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }

    /// Inspect an I/O result and raise the disconnect watch when the error
    /// class means the device vanished.
    fn track<T>(&self, result: std::io::Result<T>) -> std::io::Result<T> {
        if let Err(e) = &result {
            if is_device_gone(e) {
                trace!("Raising disconnect watch: {e}");
                self.watch.raise();
            }
        }
        result
    }
}

/// Whether an I/O error means the underlying device vanished from the bus.
fn is_device_gone(error: &std::io::Error) -> bool {
    match error.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::NotFound => true,
        _ => {
            // EIO / ENXIO / ENODEV from an unplugged USB bridge
            matches!(error.raw_os_error(), Some(5 | 6 | 19))
        },
    }
}

impl Transport for SerialTransport {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        if let Some(ref mut p) = self.port {
            p.write_data_terminal_ready(level)?;
        }
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        if let Some(ref mut p) = self.port {
            p.write_request_to_send(level)?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some() && !self.watch.fired()
    }

    fn disconnect_watch(&self) -> DisconnectWatch {
        self.watch.clone()
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port.take();
        Ok(())
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let result = match self.port.as_mut() {
            Some(p) => p.read(buf),
            None => Err(Self::closed_error()),
        };
        self.track(result)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let result = match self.port.as_mut() {
            Some(p) => p.write(buf),
            None => Err(Self::closed_error()),
        };
        self.track(result)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let result = match self.port.as_mut() {
            Some(p) => p.flush(),
            None => Err(Self::closed_error()),
        };
        self.track(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_gone_classification() {
        assert!(is_device_gone(&std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone"
        )));
        assert!(is_device_gone(&std::io::Error::from_raw_os_error(5)));
        assert!(!is_device_gone(&std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow"
        )));
    }
}
