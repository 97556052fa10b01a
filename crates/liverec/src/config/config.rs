//! Configuration management for liverec.
//!
//! Loads and saves a TOML file in the platform config directory, creating a
//! default on first run. Writes are atomic (temp file, then rename).

use crate::{
    AppError, AppResult,
    config::{
        DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS, RecorderConfig, SaveConfig, SaveMode,
        WorkloadConfig,
    },
};

use std::{
    fs,
    io::Write,
    panic::Location,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Main configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Engine settings.
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Save destination and waiting strategy.
    pub save: SaveConfig,
    /// Demo workload settings.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Load configuration from the platform config directory, creating a
    /// default if none exists.
    #[track_caller]
    #[instrument]
    pub fn load() -> AppResult<Self> {
        let dirs = Self::project_dirs()?;
        let config_path = Self::config_path(&dirs)?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!("No config found, creating default");
            let config = Self::default_for(&dirs);
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from `path`.
    #[track_caller]
    #[instrument]
    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to read config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!(config_path = ?path, "Configuration loaded");

        Ok(config)
    }

    /// Save configuration to `path` using atomic write pattern.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let temp_path = path.with_extension("toml.tmp");

        let mut temp_file = fs::File::create(&temp_path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to create temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| AppError::ConfigError {
                reason: format!("Failed to write temp config file: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        temp_file.sync_all().map_err(|e| AppError::ConfigError {
            reason: format!("Failed to sync temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        fs::rename(&temp_path, path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to rename temp config to final: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!(config_path = ?path, "Configuration saved (atomic write)");

        Ok(())
    }

    /// Default configuration writing recordings to `output_dir`.
    pub fn with_output_dir(output_dir: PathBuf) -> Self {
        Self {
            recorder: RecorderConfig::default(),
            save: SaveConfig {
                output_dir,
                mode: SaveMode::default(),
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            },
            workload: WorkloadConfig::default(),
        }
    }

    fn default_for(dirs: &ProjectDirs) -> Self {
        Self::with_output_dir(dirs.data_dir().join("recordings"))
    }

    #[track_caller]
    fn project_dirs() -> AppResult<ProjectDirs> {
        ProjectDirs::from("com", "liverec", "LiveRec").ok_or_else(|| AppError::ConfigError {
            reason: "Failed to get config directory".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    #[track_caller]
    fn config_path(dirs: &ProjectDirs) -> AppResult<PathBuf> {
        let config_dir = dirs.config_dir();

        if !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
            debug!(config_dir = ?config_dir, "Created config directory");
        }

        Ok(config_dir.join("config.toml"))
    }
}
