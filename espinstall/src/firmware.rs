//! Firmware resolution: metadata lookup, platform validation, and segment
//! preparation/loading.
//!
//! The build pipeline and the metadata service live outside this crate;
//! [`FirmwareSource`] is the seam they are consumed through. [`DirSource`]
//! implements it over a build-output directory, where each device has a
//! `manifest.json` describing the compiled artifact.

use std::fs;
use std::path::PathBuf;

use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};

/// One unit of firmware binary: a destination offset and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Flash address the payload is written to.
    pub offset: u32,
    /// Binary payload.
    pub data: Vec<u8>,
}

impl Segment {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Build metadata for a device's compiled firmware.
#[derive(Debug, Clone)]
pub struct FirmwareMetadata {
    /// Platform the firmware was compiled for (e.g. "esp32").
    pub platform: String,
    /// Project name, if recorded by the build.
    pub name: Option<String>,
    /// Firmware version string, if recorded by the build.
    pub version: Option<String>,
}

/// Source of compiled firmware artifacts.
///
/// `load_segments` is only called after `prepare` succeeded; callers drive
/// the three operations strictly in declaration order.
pub trait FirmwareSource {
    /// Fetch the declared target platform and build metadata for a device.
    fn resolve_metadata(&self, device_id: &str) -> Result<FirmwareMetadata>;

    /// Ensure the binary artifact exists and is ready to stream.
    ///
    /// May trigger a build-preparation step. Failures wrap the underlying
    /// cause so it stays available for diagnostic display.
    fn prepare(&self, device_id: &str) -> Result<()>;

    /// Load the ordered binary segments to write.
    fn load_segments(&self, device_id: &str) -> Result<Vec<Segment>>;
}

/// Validate the firmware's declared platform against the negotiated chip
/// identity. Pure, case-insensitive comparison; both values are reported
/// verbatim on mismatch.
pub fn validate_platform(declared: &str, negotiated: &str) -> Result<()> {
    if declared.eq_ignore_ascii_case(negotiated) {
        Ok(())
    } else {
        Err(Error::PlatformMismatch {
            declared: declared.to_string(),
            negotiated: negotiated.to_string(),
        })
    }
}

/// Manifest file describing one device's compiled firmware.
#[derive(Debug, Deserialize)]
struct Manifest {
    platform: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    segments: Vec<ManifestSegment>,
}

/// One segment entry in a manifest.
#[derive(Debug, Deserialize)]
struct ManifestSegment {
    offset: u32,
    path: PathBuf,
}

/// Firmware source backed by a build-output directory.
///
/// Layout: `<root>/<device_id>/manifest.json`, with segment paths resolved
/// relative to the device directory.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// Create a source over the given build-output root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_dir(&self, device_id: &str) -> PathBuf {
        self.root.join(device_id)
    }

    fn read_manifest(&self, device_id: &str) -> Result<Manifest> {
        let path = self.device_dir(device_id).join("manifest.json");
        debug!("Reading firmware manifest {}", path.display());

        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::MetadataUnavailable(format!("{}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::MetadataUnavailable(format!("{}: {e}", path.display())))
    }

    fn segment_path(&self, device_id: &str, segment: &ManifestSegment) -> PathBuf {
        self.device_dir(device_id).join(&segment.path)
    }
}

impl FirmwareSource for DirSource {
    fn resolve_metadata(&self, device_id: &str) -> Result<FirmwareMetadata> {
        let manifest = self.read_manifest(device_id)?;
        Ok(FirmwareMetadata {
            platform: manifest.platform,
            name: manifest.name,
            version: manifest.version,
        })
    }

    fn prepare(&self, device_id: &str) -> Result<()> {
        let manifest = self.read_manifest(device_id)?;
        for segment in &manifest.segments {
            let path = self.segment_path(device_id, segment);
            let metadata = fs::metadata(&path).map_err(|e| {
                Error::Preparation(Box::new(std::io::Error::new(
                    e.kind(),
                    format!("{}: {e}", path.display()),
                )))
            })?;
            if metadata.len() == 0 {
                return Err(Error::Preparation(
                    format!("{}: artifact is empty", path.display()).into(),
                ));
            }
        }
        Ok(())
    }

    fn load_segments(&self, device_id: &str) -> Result<Vec<Segment>> {
        let manifest = self.read_manifest(device_id)?;
        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            let path = self.segment_path(device_id, entry);
            let data = fs::read(&path)?;
            debug!(
                "Loaded segment 0x{:08X} ({} bytes) from {}",
                entry.offset,
                data.len(),
                path.display()
            );
            segments.push(Segment {
                offset: entry.offset,
                data,
            });
        }
        Ok(segments)
    }
}
