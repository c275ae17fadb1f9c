//! Configuration file support for espinstall.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESPINSTALL_*)
//! 3. Local config file (./espinstall.toml)
//! 4. Global config file (~/.config/espinstall/config.toml)

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Install defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallDefaults {
    /// Expected chip family.
    pub chip: Option<String>,
    /// Erase the whole flash before writing.
    #[serde(default)]
    pub erase_first: bool,
    /// Build-output directory holding device manifests.
    pub firmware_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Install defaults.
    #[serde(default)]
    pub install: InstallDefaults,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new("espinstall.toml")) {
            debug!("Loaded local config from espinstall.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not read {}: {e}", path.display());
                return None;
            },
        };
        match toml::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Invalid TOML in {}: {e}", path.display());
                None
            },
        }
    }

    /// Merge another configuration into this one (other wins where set).
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
        if other.install.chip.is_some() {
            self.install.chip = other.install.chip;
        }
        if other.install.erase_first {
            self.install.erase_first = true;
        }
        if other.install.firmware_dir.is_some() {
            self.install.firmware_dir = other.install.firmware_dir;
        }
    }

    /// Path of the global configuration file.
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "espinstall")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Remember a USB VID/PID pair in the global configuration.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> std::io::Result<()> {
        let device = UsbDevice { vid, pid };
        if !self.port.usb_device.contains(&device) {
            self.port.usb_device.push(device);
        }

        let Some(path) = Self::global_config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no global config directory",
            ));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, serialized)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}
