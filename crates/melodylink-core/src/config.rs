//! Configuration file support for melodylink
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/melodylink/config.toml`
//! - macOS: `~/Library/Application Support/melodylink/config.toml`
//! - Windows: `%APPDATA%\melodylink\config.toml`

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "melodylink";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback and synthesizer settings
    pub playback: PlaybackSettings,
    /// Conductor/listener synchronization settings
    pub sync: SyncSettings,
    /// Content cache settings
    pub cache: CacheSettings,
    /// Song library settings
    pub library: LibrarySettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Directory holding cached sequence bytes.
    ///
    /// Uses `cache.dir` when set, the platform cache directory otherwise.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache.dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs().map(|dirs| dirs.cache_dir().join("sequences")),
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# melodylink configuration file

[playback]
# Scheduler period in milliseconds
tick_interval_ms = 20

# Volume multiplier applied to sustain re-triggers (0.0-1.0)
sustain_volume_scale = 0.08

[sync]
# Session id announced by the conductor
session_id = 1

# Listeners only jump when their position drifts further than this
drift_tolerance_ms = 10000

[cache]
# Directory for cached sequences, named by their hex digest
# dir = "/var/cache/melodylink"

[library]
# Directory scanned for .mid files
# songs_dir = "~/Music/midi"
"#;

        fs::write(&path, content)?;
        Ok(path)
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Scheduler period in milliseconds
    pub tick_interval_ms: u64,
    /// Volume multiplier for sustain re-triggers
    pub sustain_volume_scale: f32,
}

impl PlaybackSettings {
    /// Scheduler period as a [`Duration`]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject settings a playback loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.sustain_volume_scale) {
            return Err(Error::Config(format!(
                "sustain_volume_scale {} is outside [0, 1]",
                self.sustain_volume_scale
            )));
        }
        Ok(())
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            sustain_volume_scale: 0.08,
        }
    }
}

/// Synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Session id announced by the conductor
    pub session_id: u32,
    /// Drift tolerance in milliseconds
    pub drift_tolerance_ms: u64,
}

impl SyncSettings {
    /// Drift tolerance in microseconds, the unit positions travel in
    pub fn drift_tolerance_micros(&self) -> u64 {
        self.drift_tolerance_ms.saturating_mul(1000)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            session_id: 1,
            drift_tolerance_ms: 10_000,
        }
    }
}

/// Content cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Override for the cache directory
    pub dir: Option<PathBuf>,
}

/// Song library settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// Directory scanned for sequences
    pub songs_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.playback.tick_interval_ms, 20);
        assert_eq!(config.sync.drift_tolerance_micros(), 10_000_000);
        assert!(config.cache.dir.is_none());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.sync.session_id, config.sync.session_id);
        assert_eq!(parsed.playback.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[sync]\ndrift_tolerance_ms = 2500\n\n[cache]\ndir = \"/tmp/ml\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sync.drift_tolerance_ms, 2500);
        assert_eq!(config.sync.session_id, 1);
        assert_eq!(config.playback.sustain_volume_scale, 0.08);
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/ml"));
    }

    #[test]
    fn test_playback_validation() {
        assert!(PlaybackSettings::default().validate().is_ok());

        let zero = PlaybackSettings {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(Error::Config(_))));

        let loud = PlaybackSettings {
            sustain_volume_scale: 1.5,
            ..Default::default()
        };
        assert!(loud.validate().is_err());
    }
}
