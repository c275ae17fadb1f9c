//! Install session orchestration.
//!
//! One session flashes one device once, driving four fallible phases in a
//! fixed order and guaranteeing teardown on every exit path. The current
//! phase is a single authoritative enum value; there are no side states and
//! no retries across phase boundaries (only the negotiator retries, within
//! its own budget). A caller that wants to try again starts a new session.
//!
//! Cancellation is modeled as dropping the session: `Drop` runs the same
//! teardown the normal paths use, so a caller can discard a session at any
//! point without leaking the port.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::chip::ChipFamily;
use crate::error::{Error, Result};
use crate::firmware::{FirmwareSource, validate_platform};
use crate::negotiator::Negotiator;
use crate::transport::{DisconnectWatch, SerialConfig, SerialTransport, Transport};
use crate::writer::{FlashWriter, Progress};

/// Width of the reset pulse on the RTS line.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Who opened the transport, and therefore who closes it.
///
/// Decided once at construction and immutable for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOwnership {
    /// The session opened the port itself and must close it.
    Session,
    /// The caller supplied an already-open port and keeps managing it.
    Caller,
}

/// Install session phases.
///
/// `Done` is terminal; entering it triggers teardown exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the transport (satisfied at construction).
    Connecting,
    /// Identifying the connected chip.
    Negotiating,
    /// Resolving, validating and loading the firmware.
    Preparing,
    /// Streaming segments and resetting the device.
    Installing,
    /// Terminal state, success or failure.
    Done,
}

/// Parameters for one install.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Identifier of the target device.
    pub device_id: String,
    /// Name of the configuration being installed.
    pub config_name: String,
    /// Chip family the caller expects, when already known. Advisory.
    pub chip_hint: Option<ChipFamily>,
    /// Perform a full-chip erase before writing.
    pub erase_first: bool,
}

impl InstallConfig {
    /// Create a config for a device and configuration name.
    pub fn new(device_id: impl Into<String>, config_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            config_name: config_name.into(),
            chip_hint: None,
            erase_first: false,
        }
    }

    /// Set the expected chip family.
    #[must_use]
    pub fn with_chip_hint(mut self, hint: Option<ChipFamily>) -> Self {
        self.chip_hint = hint;
        self
    }

    /// Enable erase-before-write.
    #[must_use]
    pub fn with_erase_first(mut self, erase: bool) -> Self {
        self.erase_first = erase;
        self
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Chip family that was flashed.
    pub chip: ChipFamily,
    /// Number of segments written.
    pub segments_written: usize,
    /// Total bytes streamed to the device.
    pub bytes_written: usize,
}

/// The install session state machine.
///
/// Exclusively owns its transport for the duration of the session; no
/// transport is ever shared between sessions, and no component other than
/// the session holds cross-phase state.
pub struct InstallSession<T: Transport> {
    config: InstallConfig,
    transport: Option<T>,
    ownership: PortOwnership,
    watch: DisconnectWatch,
    phase: Phase,
    torn_down: bool,
    negotiator: Negotiator,
    writer: FlashWriter,
}

impl InstallSession<SerialTransport> {
    /// Open the serial port and create a session that owns it.
    ///
    /// An open failure is the `Connecting` phase failing: the caller gets
    /// [`Error::Connection`] and no session exists to tear down.
    pub fn open(config: InstallConfig, serial: &SerialConfig) -> Result<Self> {
        let transport = SerialTransport::open(serial)?;
        Ok(Self::with_parts(config, transport, PortOwnership::Session))
    }
}

impl<T: Transport> InstallSession<T> {
    /// Create a session over a transport the caller already opened.
    ///
    /// The caller keeps ownership: teardown will signal a graceful
    /// disconnect but never close the port.
    pub fn with_transport(config: InstallConfig, transport: T) -> Self {
        Self::with_parts(config, transport, PortOwnership::Caller)
    }

    fn with_parts(config: InstallConfig, transport: T, ownership: PortOwnership) -> Self {
        // The disconnect watch is registered here, before any phase runs,
        // so it is observable from every phase.
        let watch = transport.disconnect_watch();
        let negotiator = Negotiator::new().with_expected(config.chip_hint);
        Self {
            config,
            transport: Some(transport),
            ownership,
            watch,
            phase: Phase::Connecting,
            torn_down: false,
            negotiator,
            writer: FlashWriter::new(),
        }
    }

    /// Replace the negotiator (retry budget, timing).
    #[must_use]
    pub fn with_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.negotiator = negotiator.with_expected(self.config.chip_hint);
        self
    }

    /// Replace the flash writer (timeouts).
    #[must_use]
    pub fn with_writer(mut self, writer: FlashWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Who owns the underlying port.
    pub fn ownership(&self) -> PortOwnership {
        self.ownership
    }

    /// Run the install to its terminal state.
    ///
    /// Produces exactly one terminal result; a second call fails without
    /// touching the device. Teardown runs unconditionally before this
    /// returns, whatever the outcome.
    pub fn run(
        &mut self,
        source: &dyn FirmwareSource,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<InstallReport> {
        if self.torn_down || self.phase != Phase::Connecting {
            return Err(Error::Protocol("install session already completed".into()));
        }

        let outcome = self.drive(source, progress);

        // A disconnect observed at any point supersedes the phase outcome,
        // including an otherwise-successful final reset.
        let outcome = if self.watch.fired() {
            Err(Error::Disconnected)
        } else {
            outcome
        };

        if let Err(e) = &outcome {
            debug!("Install for {} failed: {e}", self.config.device_id);
        }

        self.teardown();
        outcome
    }

    fn drive(
        &mut self,
        source: &dyn FirmwareSource,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<InstallReport> {
        info!(
            "Installing \"{}\" on device {}",
            self.config.config_name, self.config.device_id
        );

        // Connecting was satisfied at construction: the session opened the
        // port itself, or the caller supplied one already open.
        self.ensure_attached()?;
        self.phase = Phase::Negotiating;
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Err(Error::Protocol("transport already released".into())),
        };
        let chip = self.negotiator.identify(transport)?;
        self.ensure_attached()?;

        self.phase = Phase::Preparing;
        let metadata = source.resolve_metadata(&self.config.device_id)?;
        validate_platform(&metadata.platform, chip.name())?;
        source.prepare(&self.config.device_id)?;
        let segments = source.load_segments(&self.config.device_id)?;
        self.ensure_attached()?;

        self.phase = Phase::Installing;
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Err(Error::Protocol("transport already released".into())),
        };
        let bytes_written =
            self.writer
                .write(transport, &segments, self.config.erase_first, progress)?;
        self.ensure_attached()?;

        // The firmware is on the device; a failed reset does not undo that.
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Err(Error::Protocol("transport already released".into())),
        };
        if let Err(e) = hard_reset(transport) {
            warn!("Device reset failed (firmware was written): {e}");
        }

        Ok(InstallReport {
            chip,
            segments_written: segments.len(),
            bytes_written,
        })
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.watch.fired() {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Release the transport. A caller-owned port comes back still open; a
    /// session-owned port has been closed by teardown.
    pub fn into_transport(mut self) -> Option<T> {
        self.teardown();
        self.transport.take()
    }

    /// Teardown: runs exactly once, on every exit path. Failures here are
    /// logged and swallowed; the terminal result is already decided.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.phase = Phase::Done;

        if let Some(transport) = self.transport.as_mut() {
            if transport.is_connected() {
                if let Err(e) = graceful_disconnect(transport) {
                    debug!("Graceful disconnect failed: {e}");
                }
            }
            if self.ownership == PortOwnership::Session {
                if let Err(e) = transport.close() {
                    warn!("Failed to close {}: {e}", transport.name());
                }
            }
        }
    }
}

impl<T: Transport> Drop for InstallSession<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Issue a hard reset by pulsing the device's EN line through RTS.
fn hard_reset<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    debug!("Resetting device");
    transport.set_dtr(false)?;
    transport.set_rts(true)?;
    thread::sleep(RESET_PULSE);
    transport.set_rts(false)?;
    Ok(())
}

/// Signal a graceful disconnect: flush what we can, release the modem lines.
fn graceful_disconnect<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    let _ = std::io::Write::flush(transport);
    transport.set_dtr(false)?;
    transport.set_rts(false)?;
    Ok(())
}

#[cfg(test)]
impl<T: Transport> InstallSession<T> {
    /// Session-owned construction over an arbitrary transport, so tests can
    /// exercise the owned-port teardown contract.
    pub(crate) fn with_owned_transport(config: InstallConfig, transport: T) -> Self {
        Self::with_parts(config, transport, PortOwnership::Session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::firmware::{FirmwareMetadata, Segment};
    use crate::protocol::Opcode;
    use crate::transport::mock::MockTransport;
    use crate::writer::FLASH_BLOCK_SIZE;

    const ESP32_MAGIC: u32 = 0x00F0_1D83;
    const ESP8266_MAGIC: u32 = 0xFFF0_C101;

    struct MockSource {
        platform: &'static str,
        segments: Vec<Segment>,
        loaded: Cell<bool>,
    }

    impl MockSource {
        fn new(platform: &'static str, segment_sizes: &[usize]) -> Self {
            let segments = segment_sizes
                .iter()
                .enumerate()
                .map(|(i, &len)| Segment {
                    offset: (i as u32) * 0x1000,
                    data: vec![0xA5; len],
                })
                .collect();
            Self {
                platform,
                segments,
                loaded: Cell::new(false),
            }
        }
    }

    impl FirmwareSource for MockSource {
        fn resolve_metadata(&self, _device_id: &str) -> Result<FirmwareMetadata> {
            Ok(FirmwareMetadata {
                platform: self.platform.to_string(),
                name: None,
                version: None,
            })
        }

        fn prepare(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        fn load_segments(&self, _device_id: &str) -> Result<Vec<Segment>> {
            self.loaded.set(true);
            Ok(self.segments.clone())
        }
    }

    fn fast_session<T: Transport>(transport: T) -> InstallSession<T> {
        InstallSession::with_owned_transport(
            InstallConfig::new("sensor-1", "garden-sensor"),
            transport,
        )
        .with_negotiator(
            Negotiator::new()
                .with_budget(2, 1)
                .with_timing(Duration::from_millis(10), Duration::ZERO),
        )
        .with_writer(FlashWriter::new().with_timeouts(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ))
    }

    fn script_negotiation(transport: &mut MockTransport, magic: u32) {
        transport.respond(Opcode::Sync, 0);
        transport.respond(Opcode::ReadReg, magic);
    }

    fn script_transfer(transport: &mut MockTransport, segments: usize, blocks_each: usize) {
        for _ in 0..segments {
            transport.respond(Opcode::FlashBegin, 0);
            transport.respond_n(Opcode::FlashData, 0, blocks_each);
        }
        transport.respond(Opcode::FlashEnd, 0);
    }

    #[test]
    fn test_successful_install_produces_report_and_closes_once() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        script_transfer(&mut transport, 1, 1);

        let source = MockSource::new("esp32", &[64]);
        let mut session = fast_session(transport);

        let mut observed = Vec::new();
        let report = session
            .run(&source, &mut |p| observed.push(p))
            .unwrap();
        assert_eq!(report.chip, ChipFamily::Esp32);
        assert_eq!(report.segments_written, 1);
        assert_eq!(report.bytes_written, 64);
        assert_eq!(observed.last(), Some(&Progress::Percent(100)));

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
        // Reset pulse was issued over RTS.
        assert!(transport.rts_levels.contains(&true));
    }

    #[test]
    fn test_run_produces_exactly_one_terminal_result() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        script_transfer(&mut transport, 1, 1);

        let source = MockSource::new("esp32", &[16]);
        let mut session = fast_session(transport);

        session.run(&source, &mut |_| {}).unwrap();
        let second = session.run(&source, &mut |_| {});
        assert!(second.is_err());

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_caller_supplied_port_is_never_closed() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        script_transfer(&mut transport, 1, 1);

        let source = MockSource::new("esp32", &[16]);
        let mut session = InstallSession::with_transport(
            InstallConfig::new("sensor-1", "garden-sensor"),
            transport,
        )
        .with_writer(FlashWriter::new().with_timeouts(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));

        session.run(&source, &mut |_| {}).unwrap();
        assert_eq!(session.ownership(), PortOwnership::Caller);

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 0);
    }

    #[test]
    fn test_platform_mismatch_short_circuits_before_loading() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP8266_MAGIC);

        let source = MockSource::new("ESP32", &[64]);
        let mut session = fast_session(transport);

        let err = session.run(&source, &mut |_| {}).unwrap_err();
        match err {
            Error::PlatformMismatch {
                declared,
                negotiated,
            } => {
                assert_eq!(declared, "ESP32");
                assert_eq!(negotiated, "esp8266");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!source.loaded.get(), "segments must not be loaded");

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
        // No reset was attempted.
        assert!(!transport.rts_levels.contains(&true));
    }

    #[test]
    fn test_handshake_budget_exhaustion_closes_owned_port() {
        let transport = MockTransport::new();
        let source = MockSource::new("esp32", &[64]);
        let mut session = fast_session(transport);

        let err = session.run(&source, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Initialization(_)));

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_transfer_failure_flags_partial_flash_and_skips_reset() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        // Segments 1 and 2 complete; segment 3 never gets its ack.
        for _ in 0..2 {
            transport.respond(Opcode::FlashBegin, 0);
            transport.respond(Opcode::FlashData, 0);
        }

        let source = MockSource::new("esp32", &[64, 64, 64, 64, 64]);
        let mut session = fast_session(transport);

        let err = session.run(&source, &mut |_| {}).unwrap_err();
        assert!(err.leaves_partial_flash());
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

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
        assert!(!transport.rts_levels.contains(&true));
    }

    #[test]
    fn test_disconnect_during_transfer_supersedes_transfer_error() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        transport.respond(Opcode::FlashBegin, 0);
        transport.respond(Opcode::FlashData, 0);
        // The device vanishes once the scripted responses run out.
        transport.drop_when_drained = true;

        let source = MockSource::new("esp32", &[2 * FLASH_BLOCK_SIZE + 512]);
        let mut session = fast_session(transport);

        let err = session.run(&source, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Disconnected), "got {err:?}");

        let transport = session.into_transport().unwrap();
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_disconnect_observed_before_install_stops_writes() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        let watch = transport.disconnect_watch();

        let source = MockSource::new("esp32", &[64]);
        let mut session = fast_session(transport);

        watch.raise();
        let err = session.run(&source, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Disconnected));

        // No flash traffic went out after the disconnect was observed.
        let transport = session.into_transport().unwrap();
        let mut decoder = crate::protocol::SlipDecoder::new();
        let flash_frames = transport
            .written
            .iter()
            .filter_map(|&b| decoder.feed(b))
            .filter(|frame| frame.get(1) == Some(&(Opcode::FlashBegin as u8)))
            .count();
        assert_eq!(flash_frames, 0);
    }

    #[test]
    fn test_reset_failure_does_not_flip_success() {
        let mut transport = MockTransport::new();
        script_negotiation(&mut transport, ESP32_MAGIC);
        script_transfer(&mut transport, 1, 1);
        transport.fail_rts = true;

        let source = MockSource::new("esp32", &[32]);
        let mut session = fast_session(transport);

        let report = session.run(&source, &mut |_| {});
        assert!(report.is_ok(), "reset failure must stay non-fatal");
    }

    #[test]
    fn test_dropping_session_tears_down_owned_port() {
        let transport = MockTransport::new();
        let probe = transport.close_probe();
        let session = fast_session(transport);

        drop(session);
        assert_eq!(probe.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_session_leaves_caller_port_open() {
        let transport = MockTransport::new();
        let probe = transport.close_probe();
        let session = InstallSession::with_transport(
            InstallConfig::new("sensor-1", "garden-sensor"),
            transport,
        );

        drop(session);
        assert_eq!(probe.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
