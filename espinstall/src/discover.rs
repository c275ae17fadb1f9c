//! Serial port discovery and USB bridge classification.
//!
//! Used by the UI layer for port selection; install sessions never call
//! into this module.

use log::{debug, trace};

use crate::error::{Error, Result};

/// Known USB bridge/device kinds commonly found on ESP development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbBridge {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Espressif native USB (USB-Serial/JTAG or USB-OTG).
    Espressif,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for common USB-to-UART bridges.
const KNOWN_USB_BRIDGES: &[(u16, &[u16], UsbBridge)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        UsbBridge::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], UsbBridge::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        UsbBridge::Ftdi,
    ),
    (0x303A, &[], UsbBridge::Espressif),
];

impl UsbBridge {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, bridge) in KNOWN_USB_BRIDGES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *bridge;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the bridge kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Espressif => "Espressif USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected bridge kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified USB bridge kind.
    pub bridge: UsbBridge,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this port is likely an ESP development board.
    pub fn is_likely_device_board(&self) -> bool {
        self.bridge.is_known()
    }
}

/// Detect all available serial ports with USB metadata.
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    bridge: UsbBridge::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb) = port_info.port_type {
                    detected.bridge = UsbBridge::from_vid_pid(usb.vid, usb.pid);
                    detected.vid = Some(usb.vid);
                    detected.pid = Some(usb.pid);
                    detected.manufacturer = usb.manufacturer;
                    detected.product = usb.product;
                    detected.serial = usb.serial_number;
                }

                trace!(
                    "Detected {} ({})",
                    detected.name,
                    detected.bridge.name()
                );
                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Port enumeration failed: {e}");
        },
    }

    result
}

/// Detect serial ports that look like ESP development boards.
pub fn detect_device_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_device_board)
        .collect()
}

/// Auto-detect a single best serial port candidate.
///
/// Prefers ports with a recognized USB bridge; errors when nothing
/// plausible is attached.
pub fn auto_detect_port() -> Result<DetectedPort> {
    let candidates = detect_device_ports();
    match candidates.into_iter().next() {
        Some(port) => Ok(port),
        None => Err(Error::Connection(
            "no serial port with a recognized USB bridge found".into(),
        )),
    }
}
