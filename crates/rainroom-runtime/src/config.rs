//! Installation settings – reads/writes `rainroom.toml`.
//!
//! The file holds what the operator tunes at run time (grid origin,
//! sensitivity, per-sensor activation and calibration) plus the relay gateway
//! address.  A missing or unreadable file is never fatal: the control loop
//! starts from defaults and writes a fresh file on the first change.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rainroom_types::RainError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// File used when `RAINROOM_CONFIG` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "rainroom.toml";

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Persisted state of one sensor, keyed by its serial number.
///
/// A sensor seen for the first time is active and uncalibrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub active: bool,
    /// Calibration shift in millimetres.
    pub x_shift: i32,
    pub y_shift: i32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            active: true,
            x_shift: 0,
            y_shift: 0,
        }
    }
}

/// Where the relay gateway lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "192.168.0.191".to_string(),
            port: 9761,
            timeout_ms: 500,
        }
    }
}

impl RelaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply `RAINROOM_RELAY_HOST` / `RAINROOM_RELAY_PORT`.
    ///
    /// Overrides are applied to a copy handed to the relay client, never to
    /// the stored settings, so they are not written back to disk.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("RAINROOM_RELAY_HOST") {
            self.host = host;
        }
        if let Some(v) = lookup("RAINROOM_RELAY_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => warn!(value = %v, "ignoring invalid RAINROOM_RELAY_PORT"),
            }
        }
        self
    }
}

/// Everything stored in `rainroom.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationConfig {
    /// Grid origin in millimetres.
    pub x_origin: i32,
    pub y_origin: i32,
    /// A cell turns green when its count exceeds this.
    pub sensitivity: u32,
    /// Control loop period.
    pub tick_ms: u64,
    /// Alternation period of special mode.
    pub special_interval_ms: u64,
    pub relay: RelaySettings,
    pub sensors: BTreeMap<String, SensorSettings>,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            x_origin: 0,
            y_origin: 0,
            sensitivity: 0,
            tick_ms: 50,
            special_interval_ms: 5_000,
            relay: RelaySettings::default(),
            sensors: BTreeMap::new(),
        }
    }
}

impl InstallationConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn special_interval(&self) -> Duration {
        Duration::from_millis(self.special_interval_ms)
    }

    /// Stored settings for `sensor_id`, or active and uncalibrated.
    pub fn sensor(&self, sensor_id: &str) -> SensorSettings {
        self.sensors.get(sensor_id).copied().unwrap_or_default()
    }

    pub fn sensor_mut(&mut self, sensor_id: &str) -> &mut SensorSettings {
        self.sensors.entry(sensor_id.to_string()).or_default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

/// A config file at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$RAINROOM_CONFIG`, or `rainroom.toml` in the working directory.
    pub fn from_env() -> Self {
        let path = std::env::var("RAINROOM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file.  `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::Config`] when the file cannot be read or parsed.
    pub fn try_load(&self) -> Result<Option<InstallationConfig>, RainError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            RainError::Config(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let cfg = toml::from_str(&raw).map_err(|e| {
            RainError::Config(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(cfg))
    }

    /// Read the file, falling back to defaults on any problem.
    pub fn load(&self) -> InstallationConfig {
        match self.try_load() {
            Ok(Some(cfg)) => {
                debug!(path = %self.path.display(), "configuration loaded");
                cfg
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "no configuration file, using defaults");
                InstallationConfig::default()
            }
            Err(e) => {
                warn!(error = %e, "configuration unusable, using defaults");
                InstallationConfig::default()
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`RainError::Config`] when the file cannot be written.
    pub fn save(&self, cfg: &InstallationConfig) -> Result<(), RainError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                RainError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let raw = toml::to_string_pretty(cfg)
            .map_err(|e| RainError::Config(format!("failed to serialize settings: {e}")))?;
        fs::write(&self.path, raw).map_err(|e| {
            RainError::Config(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}
