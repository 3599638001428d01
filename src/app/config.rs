//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::session::SessionConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Observer API settings
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Maximum entries kept in the event log
    pub eventlog_capacity: usize,

    /// Where `POST /options/save` writes (defaults to the data directory)
    pub options_file: Option<PathBuf>,

    /// Replays that may wait for the engine at once
    pub replay_queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Listen address
    pub listen_addr: String,

    /// Listen port (0 picks a free one)
    pub port: u16,

    /// Updates buffered per observer before it is disconnected
    pub observer_queue_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            eventlog_capacity: 10_000,
            options_file: None,
            replay_queue_size: 64,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 8081,
            observer_queue_size: 1024,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.eventlog_capacity == 0 {
            return Err(ConfigError::ValidationError {
                field: "general.eventlog_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.general.replay_queue_size == 0 {
            return Err(ConfigError::ValidationError {
                field: "general.replay_queue_size".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.web.observer_queue_size == 0 {
            return Err(ConfigError::ValidationError {
                field: "web.observer_queue_size".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.web.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::ValidationError {
                field: "web.listen_addr".into(),
                reason: format!("'{}' is not an IP address", self.web.listen_addr),
            });
        }
        Ok(())
    }

    /// Session sizing derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        let options_file = self
            .general
            .options_file
            .clone()
            .or_else(|| Self::data_dir().ok().map(|d| d.join("options.toml")));
        SessionConfig {
            eventlog_capacity: self.general.eventlog_capacity,
            observer_queue_size: self.web.observer_queue_size,
            options_file,
        }
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "flowdeck", "flowdeck")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "flowdeck", "flowdeck")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UserHint;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.web.port, 8081);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[web]\nport = 9000\n\n[general]\noptions_file = \"/tmp/opts.toml\"\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.listen_addr, "127.0.0.1");
        assert_eq!(config.general.eventlog_capacity, 10_000);

        let session = config.session_config();
        assert_eq!(session.options_file, Some(PathBuf::from("/tmp/opts.toml")));
        assert_eq!(session.observer_queue_size, 1024);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.general.replay_queue_size, 64);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[web\nport = ").unwrap();
        assert!(Config::load(path.to_str()).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.web.observer_queue_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.user_hint().contains("web.observer_queue_size"));

        let mut config = Config::default();
        config.web.listen_addr = "localhost:80".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_config_round_trips() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.web.listen_addr, "127.0.0.1");
        assert_eq!(parsed.general.eventlog_capacity, 10_000);
    }
}
