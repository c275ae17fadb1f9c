//! Scripted transport double shared by unit tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::Opcode;
use crate::protocol::command::testing::encode_response;
use crate::transport::{DisconnectWatch, Transport};

/// In-memory transport fed with canned response frames.
///
/// Reads drain the `rx` queue one byte at a time; an empty queue reads as a
/// timeout, which is how real ports behave when the device stays silent.
pub(crate) struct MockTransport {
    rx: VecDeque<u8>,
    /// Everything written through the transport.
    pub written: Vec<u8>,
    /// DTR line transitions observed.
    pub dtr_levels: Vec<bool>,
    /// RTS line transitions observed.
    pub rts_levels: Vec<bool>,
    /// When set, I/O fails as if the device vanished.
    pub drop_device: bool,
    /// When set, the device vanishes once the scripted responses run out.
    pub drop_when_drained: bool,
    /// When set, RTS changes fail (reset cannot be pulsed).
    pub fail_rts: bool,
    close_calls: Arc<AtomicUsize>,
    watch: DisconnectWatch,
    timeout: Duration,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            written: Vec::new(),
            dtr_levels: Vec::new(),
            rts_levels: Vec::new(),
            drop_device: false,
            drop_when_drained: false,
            fail_rts: false,
            close_calls: Arc::new(AtomicUsize::new(0)),
            watch: DisconnectWatch::new(),
            timeout: Duration::from_millis(10),
            connected: true,
        }
    }

    /// Queue a successful response frame.
    pub fn respond(&mut self, opcode: Opcode, value: u32) {
        self.rx.extend(encode_response(opcode, value, 0));
    }

    /// Queue `count` successful responses with the same opcode.
    pub fn respond_n(&mut self, opcode: Opcode, value: u32, count: usize) {
        for _ in 0..count {
            self.respond(opcode, value);
        }
    }

    /// Simulate the device vanishing from the bus immediately.
    pub fn unplug(&mut self) {
        self.drop_device = true;
    }

    /// Shared close counter, usable after the transport moved into a
    /// session.
    pub fn close_probe(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    /// Number of `close` calls observed so far.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn gone(&self) -> std::io::Error {
        self.watch.raise();
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged")
    }
}

impl Transport for MockTransport {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr_levels.push(level);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        if self.fail_rts {
            return Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::Other),
                "RTS stuck",
            )));
        }
        self.rts_levels.push(level);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.watch.fired()
    }

    fn disconnect_watch(&self) -> DisconnectWatch {
        self.watch.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.drop_device {
            return Err(self.gone());
        }
        match self.rx.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            },
            None if self.drop_when_drained => Err(self.gone()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no scripted data",
            )),
        }
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.drop_device {
            return Err(self.gone());
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
