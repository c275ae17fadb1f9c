//! Chip family identification.
//!
//! Chip families are a closed enum: the bootloader reports a magic word from
//! a fixed register, and [`ChipFamily::from_magic`] maps it through a lookup
//! table. Adding a family means extending the enum and the table, both
//! checked at compile time.

use std::fmt;

/// Address of the chip-detect magic register, common to all supported
/// bootloader ROMs.
pub const CHIP_MAGIC_REG: u32 = 0x4000_1000;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// ESP8266 (WiFi).
    Esp8266,
    /// ESP32 (WiFi + BT classic + BLE).
    Esp32,
    /// ESP32-S2 (WiFi, single core).
    Esp32s2,
    /// ESP32-S3 (WiFi + BLE, dual core).
    Esp32s3,
    /// ESP32-C3 (WiFi + BLE, RISC-V).
    Esp32c3,
}

/// Known chip-detect magic words, per family.
///
/// Some silicon revisions report distinct values, so a family may appear
/// more than once.
const CHIP_MAGIC_TABLE: &[(u32, ChipFamily)] = &[
    (0xFFF0C101, ChipFamily::Esp8266),
    (0x00F01D83, ChipFamily::Esp32),
    (0x000007C6, ChipFamily::Esp32s2),
    (0x00000009, ChipFamily::Esp32s3),
    (0x6921506F, ChipFamily::Esp32c3),
    (0x1B31506F, ChipFamily::Esp32c3),
];

impl ChipFamily {
    /// Map a chip-detect magic word to a chip family.
    #[must_use]
    pub fn from_magic(magic: u32) -> Option<Self> {
        CHIP_MAGIC_TABLE
            .iter()
            .find(|(value, _)| *value == magic)
            .map(|(_, family)| *family)
    }

    /// Get the chip family from a platform name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "esp8266" => Some(Self::Esp8266),
            "esp32" => Some(Self::Esp32),
            "esp32s2" | "esp32-s2" => Some(Self::Esp32s2),
            "esp32s3" | "esp32-s3" => Some(Self::Esp32s3),
            "esp32c3" | "esp32-c3" => Some(Self::Esp32c3),
            _ => None,
        }
    }

    /// Canonical platform name, as used by firmware metadata.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Esp8266 => "esp8266",
            Self::Esp32 => "esp32",
            Self::Esp32s2 => "esp32s2",
            Self::Esp32s3 => "esp32s3",
            Self::Esp32c3 => "esp32c3",
        }
    }

    /// Default flash offset for application images on this family.
    #[must_use]
    pub fn app_offset(&self) -> u32 {
        match self {
            Self::Esp8266 => 0x0000,
            Self::Esp32 | Self::Esp32s2 | Self::Esp32s3 | Self::Esp32c3 => 0x1_0000,
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp8266 => write!(f, "ESP8266"),
            Self::Esp32 => write!(f, "ESP32"),
            Self::Esp32s2 => write!(f, "ESP32-S2"),
            Self::Esp32s3 => write!(f, "ESP32-S3"),
            Self::Esp32c3 => write!(f, "ESP32-C3"),
        }
    }
}
