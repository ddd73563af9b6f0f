//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Missing files
//! and missing keys fall back to defaults.

use crate::location::types::{AccuracyTier, LocationRequest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Sync settings
    pub sync: SyncSettings,
    /// Location producer settings
    pub location: LocationSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            recording: RecordingSettings::default(),
            sync: SyncSettings::default(),
            location: LocationSettings::default(),
        }
    }
}

impl AppConfig {
    /// Path of the local database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("rustrun.db")
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recording.validate()?;
        self.sync.validate()
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Automatically pause/resume on low/high speed
    pub auto_pause: bool,
    /// Fixes less accurate than this are sampled but not integrated
    pub good_accuracy_m: f64,
    /// Steps at least this long are treated as GPS spikes
    pub spike_distance_m: f64,
    /// Minimum positive altitude delta counted as climbing
    pub elevation_noise_m: f64,
    /// Auto-pause below this speed
    pub pause_speed_mps: f64,
    /// Auto-resume above this speed
    pub resume_speed_mps: f64,
    /// Distance covered by each automatic split
    pub auto_split_distance_m: f64,
    /// Elapsed/moving time refresh interval
    pub tick_interval_ms: u64,
    /// Crash checkpoint interval
    pub checkpoint_interval_secs: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            auto_pause: true,
            good_accuracy_m: 35.0,
            spike_distance_m: 80.0,
            elevation_noise_m: 0.8,
            pause_speed_mps: 0.6,
            resume_speed_mps: 1.0,
            auto_split_distance_m: 1000.0,
            tick_interval_ms: 1000,
            checkpoint_interval_secs: 30,
        }
    }
}

impl RecordingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resume_speed_mps <= self.pause_speed_mps {
            return Err(ConfigError::Invalid(format!(
                "resume_speed_mps ({}) must exceed pause_speed_mps ({})",
                self.resume_speed_mps, self.pause_speed_mps
            )));
        }
        if !(self.auto_split_distance_m > 0.0 && self.auto_split_distance_m.is_finite()) {
            return Err(ConfigError::Invalid(
                "auto_split_distance_m must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sample sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// In-memory batch size that triggers a flush
    pub batch_size: usize,
    /// Maximum samples written per drain request
    pub drain_batch_size: usize,
    /// Periodic drain interval
    pub flush_interval_secs: u64,
    /// Remote store base URL; none keeps samples local
    pub endpoint: Option<String>,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            drain_batch_size: 25,
            flush_interval_secs: 15,
            endpoint: None,
            request_timeout_secs: 10,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.drain_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch sizes must be positive".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Location producer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub foreground_interval_ms: u64,
    pub foreground_distance_filter_m: f64,
    /// Use the background producer when the runtime offers it
    pub background_enabled: bool,
    pub background_interval_ms: u64,
    pub background_distance_filter_m: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        let fg = LocationRequest::foreground();
        let bg = LocationRequest::background();
        Self {
            foreground_interval_ms: fg.interval_ms,
            foreground_distance_filter_m: fg.distance_filter_m,
            background_enabled: true,
            background_interval_ms: bg.interval_ms,
            background_distance_filter_m: bg.distance_filter_m,
        }
    }
}

impl LocationSettings {
    /// Subscription request for the foreground producer.
    pub fn foreground_request(&self) -> LocationRequest {
        LocationRequest {
            accuracy: AccuracyTier::High,
            interval_ms: self.foreground_interval_ms,
            distance_filter_m: self.foreground_distance_filter_m,
            deferred: false,
        }
    }

    /// Subscription request for the background producer.
    pub fn background_request(&self) -> LocationRequest {
        LocationRequest {
            accuracy: AccuracyTier::Balanced,
            interval_ms: self.background_interval_ms,
            distance_filter_m: self.background_distance_filter_m,
            deferred: true,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "rustrun", "RustRun")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from a specific file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str::<AppConfig>(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
    } else {
        AppConfig::default()
    };

    config.data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.validate()?;

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to a specific file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
