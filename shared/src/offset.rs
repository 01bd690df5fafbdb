/*!
Sensor mounting offsets.

Offsets arrive in user units (`OffsetRecord`, the persisted JSON shape) and
are normalized once into meters + degrees ([`Offset`], [`CameraOffset`]).
Everything downstream only ever sees the normalized form.
*/

use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Length unit accepted for offset input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Meters,
    Centimeters,
    Millimeters,
    Inches,
}

impl LengthUnit {
    /// Value to divide by to get meters
    pub fn divisor(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Centimeters => 100.0,
            Self::Millimeters => 1000.0,
            Self::Inches => 39.3701,
        }
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value / self.divisor()
    }
}

impl FromStr for LengthUnit {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "m" | "meters" | "M" => Ok(Self::Meters),
            "cm" | "CM" => Ok(Self::Centimeters),
            "mm" | "MM" => Ok(Self::Millimeters),
            "in" | "IN" | "inches" => Ok(Self::Inches),
            other => Err(SharedError::InvalidUnit(other.to_string())),
        }
    }
}

/// Mounting offset in meters, heading in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub heading_offset: f64,
}

/// Camera mounting offset: the common offset plus a tilt correction
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraOffset {
    pub mount: Offset,
    /// Degrees
    pub elevation_offset: f64,
}

/// Offset as entered by the user and stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub unit: String,
    pub heading_offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_offset: Option<f64>,
}

impl OffsetRecord {
    /// Zero GPS offset
    pub fn gps_default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            unit: "meters".to_string(),
            heading_offset: 0.0,
            elevation_offset: None,
        }
    }

    /// Zero camera offset
    pub fn camera_default() -> Self {
        Self {
            elevation_offset: Some(0.0),
            ..Self::gps_default()
        }
    }

    pub fn unit(&self) -> Result<LengthUnit> {
        self.unit.parse()
    }

    /// Normalize to meters; fails on an unknown unit
    pub fn to_offset(&self) -> Result<Offset> {
        let unit = self.unit()?;
        Ok(Offset {
            x: unit.to_meters(self.x),
            y: unit.to_meters(self.y),
            z: unit.to_meters(self.z),
            heading_offset: self.heading_offset,
        })
    }

    /// Normalize to a camera offset; a missing elevation offset reads as 0
    pub fn to_camera_offset(&self) -> Result<CameraOffset> {
        Ok(CameraOffset {
            mount: self.to_offset()?,
            elevation_offset: self.elevation_offset.unwrap_or(0.0),
        })
    }
}

/// Destination for offsets changed at runtime
pub trait OffsetStore: Send + Sync {
    fn save(&self, record: &OffsetRecord) -> Result<()>;
}

/// Offset kept in a JSON file
#[derive(Debug, Clone)]
pub struct JsonOffsetStore {
    path: PathBuf,
}

impl JsonOffsetStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the stored record
    pub fn load(&self) -> Result<OffsetRecord> {
        let content = std::fs::read_to_string(&self.path)?;
        let record: OffsetRecord = serde_json::from_str(&content)?;
        record.unit()?;
        Ok(record)
    }

    /// Load the stored record, or write and return `default` when the file
    /// is missing, unreadable, or lacks a field `default` carries
    pub fn load_or_init(&self, default: OffsetRecord) -> Result<OffsetRecord> {
        match self.load() {
            Ok(record) if default.elevation_offset.is_none() || record.elevation_offset.is_some() => {
                info!("📐 Loaded offset from {}", self.path.display());
                Ok(record)
            }
            Ok(_) => {
                warn!("Offset file {} lacks elevation_offset, resetting", self.path.display());
                self.save(&default)?;
                Ok(default)
            }
            Err(e) => {
                warn!("Could not load offset file {} ({}), writing defaults", self.path.display(), e);
                self.save(&default)?;
                Ok(default)
            }
        }
    }
}

impl OffsetStore for JsonOffsetStore {
    fn save(&self, record: &OffsetRecord) -> Result<()> {
        let content = serde_json::to_string(record)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
