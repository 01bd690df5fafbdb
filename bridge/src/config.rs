/*!
Configuration management for the bridge application.
*/

use crate::link::LinkSettings;
use crate::serial::PortSettings;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::CameraIntrinsics;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: LinkConfig<Controller>,
    pub gps: GpsConfig,
    pub camera: CameraIntrinsics,
    pub offsets: OffsetFiles,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            controller: LinkConfig::default(),
            gps: GpsConfig::default(),
            camera: CameraIntrinsics::default(),
            offsets: OffsetFiles::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which link a [`LinkConfig`] section configures
pub trait LinkRole {
    /// Worker and log name
    const NAME: &'static str;
    /// Default regex matched against device descriptions
    const DEVICE_PATTERN: &'static str;
}

/// The V5 brain's user port
#[derive(Debug, Clone, Copy)]
pub struct Controller;

impl LinkRole for Controller {
    const NAME: &'static str = "controller";
    const DEVICE_PATTERN: &'static str = "V5.*User";
}

/// The GPS sensor's user port
#[derive(Debug, Clone, Copy)]
pub struct Gps;

impl LinkRole for Gps {
    const NAME: &'static str = "gps";
    const DEVICE_PATTERN: &'static str = "GPS.*User";
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, bound = "")]
pub struct LinkConfig<R: LinkRole> {
    /// Fixed device path; discovery is skipped when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Regex matched against device descriptions
    pub device_pattern: String,

    pub baud_rate: u32,

    /// Blocking read timeout, also the worst-case shutdown delay
    pub read_timeout_ms: u64,

    /// Pause between discovery attempts and after I/O faults
    pub retry_interval_ms: u64,

    /// Consecutive discovery misses before the link gives up
    pub discovery_attempts: u32,

    #[serde(skip)]
    role: PhantomData<R>,
}

impl<R: LinkRole> LinkConfig<R> {
    /// Resolve into worker settings; fails on a bad device pattern
    pub fn settings(&self) -> Result<LinkSettings> {
        let device_pattern = Regex::new(&self.device_pattern)
            .with_context(|| format!("Invalid {} device pattern: {}", R::NAME, self.device_pattern))?;

        Ok(LinkSettings {
            name: R::NAME.to_string(),
            device: self.device.clone(),
            device_pattern,
            port: PortSettings {
                baud_rate: self.baud_rate,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
            },
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            discovery_attempts: self.discovery_attempts,
        })
    }
}

impl<R: LinkRole> Default for LinkConfig<R> {
    fn default() -> Self {
        Self {
            device: None,
            device_pattern: R::DEVICE_PATTERN.to_string(),
            baud_rate: shared::protocol::DEFAULT_BAUD_RATE,
            read_timeout_ms: 10_000,
            retry_interval_ms: 1_000,
            discovery_attempts: 5,
            role: PhantomData,
        }
    }
}

/// GPS link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    #[serde(flatten)]
    pub link: LinkConfig<Gps>,

    /// Moving-average depth over x and y
    pub smoothing_window: usize,

    /// Append every smoothed fix to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            smoothing_window: shared::smoother::DEFAULT_WINDOW,
            trace_file: None,
        }
    }
}

/// Where mounting offsets are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetFiles {
    pub gps_file: PathBuf,
    pub camera_file: PathBuf,
}

impl Default for OffsetFiles {
    fn default() -> Self {
        Self {
            gps_file: PathBuf::from("gps_offsets.json"),
            camera_file: PathBuf::from("camera_offsets.json"),
        }
    }
}

/// Telemetry publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest wait for a detection batch before publishing position only
    pub publish_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 100,
        }
    }
}
