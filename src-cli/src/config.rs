//! Console configuration.
//!
//! Loaded once at startup from `config.json` in the platform config
//! directory (or `--config`), overridden by command-line flags, validated,
//! and then shared read-only behind an `Arc`.

use std::path::{Path, PathBuf};

use plotcam_common::ring::MAX_SLOTS;
use plotcam_common::security::validation::{validate_dimensions, validate_fps, ValidationError};
use plotcam_common::{ImageFormat, Rotation, SourceKind, StreamConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which accelerometer the level gate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccelerometerKind {
    /// Simulated sensor that settles towards level
    #[default]
    Simulated,
    /// No sensor attached; captures are never gated
    None,
}

impl AccelerometerKind {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Some(AccelerometerKind::Simulated),
            "none" | "absent" => Some(AccelerometerKind::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerometerConfig {
    pub kind: AccelerometerKind,
    /// Polling period of the sampler timer
    pub period_ms: u64,
    /// How long to wait for the sensor to attach
    pub attach_timeout_ms: u64,
}

impl Default for AccelerometerConfig {
    fn default() -> Self {
        Self {
            kind: AccelerometerKind::default(),
            period_ms: 100,
            attach_timeout_ms: 1000,
        }
    }
}

/// Immutable application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory holding one directory per experiment
    pub experiments_dir: PathBuf,
    pub stream: StreamConfig,
    /// Refresh rate of the display loop, independent of the camera
    pub display_fps: u32,
    pub ring_slots: usize,
    pub rotation: Rotation,
    /// Metres per depth unit
    pub depth_scale: f32,
    pub image_format: ImageFormat,
    /// Maximum tilt on either axis, in g, for a capture to fire
    pub level_tolerance: f64,
    pub accelerometer: AccelerometerConfig,
    pub plot_number_padding: usize,
    pub save_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub source: SourceKind,
    /// Side-by-side layout for the VR headset viewer
    pub vr_layout: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            experiments_dir: PathBuf::from("experiments"),
            stream: StreamConfig::default(),
            display_fps: 30,
            ring_slots: 1,
            rotation: Rotation::default(),
            depth_scale: 0.001,
            image_format: ImageFormat::default(),
            level_tolerance: 0.2,
            accelerometer: AccelerometerConfig::default(),
            plot_number_padding: 3,
            save_timeout_secs: 10,
            shutdown_timeout_secs: 5,
            source: SourceKind::default(),
            vr_layout: false,
        }
    }
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub resolution: Option<(u32, u32)>,
    pub fps: Option<u32>,
    pub vr: bool,
    pub experiments_dir: Option<PathBuf>,
    pub source: Option<SourceKind>,
    pub accelerometer: Option<AccelerometerKind>,
}

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file is not valid JSON for [`AppConfig`]
    Parse { path: PathBuf, message: String },
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse { path, message } => {
                write!(f, "Invalid config file {}: {}", path.display(), message)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ValidationError> for ConfigError {
    fn from(e: ValidationError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

impl AppConfig {
    /// Load the configuration file at `path`.
    ///
    /// A missing or unreadable file yields the defaults with a warning; a
    /// file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                warn!(
                    "Cannot read config file {}: {}; using defaults",
                    path.display(),
                    e
                );
                return Ok(Self::default());
            }
        };

        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some((width, height)) = overrides.resolution {
            self.stream.width = width;
            self.stream.height = height;
        }
        if let Some(fps) = overrides.fps {
            self.stream.fps = fps;
        }
        if overrides.vr {
            self.vr_layout = true;
        }
        if let Some(dir) = &overrides.experiments_dir {
            self.experiments_dir = dir.clone();
        }
        if let Some(source) = overrides.source {
            self.source = source;
        }
        if let Some(kind) = overrides.accelerometer {
            self.accelerometer.kind = kind;
        }
        self
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dimensions(self.stream.width, self.stream.height)?;
        validate_fps("fps", self.stream.fps)?;
        validate_fps("display_fps", self.display_fps)?;

        if self.ring_slots == 0 || self.ring_slots > MAX_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "ring_slots must be 1..={} (got {})",
                MAX_SLOTS, self.ring_slots
            )));
        }
        if !(self.level_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "level_tolerance must be >= 0 (got {})",
                self.level_tolerance
            )));
        }
        if !(self.depth_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "depth_scale must be > 0 (got {})",
                self.depth_scale
            )));
        }
        if self.accelerometer.period_ms == 0 {
            return Err(ConfigError::Invalid(
                "accelerometer.period_ms must be > 0".to_string(),
            ));
        }
        if self.plot_number_padding == 0 || self.plot_number_padding > 9 {
            return Err(ConfigError::Invalid(format!(
                "plot_number_padding must be 1..=9 (got {})",
                self.plot_number_padding
            )));
        }
        if self.save_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "save_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a `WIDTHxHEIGHT` resolution.
pub fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}'", w))?;
    let height = h
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}'", h))?;
    Ok((width, height))
}
