//! Configuration file support for stkflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (STKFLASH_PORT, STKFLASH_BOARD)
//! 3. Local config file (./stkflash.toml)
//! 4. Global config file (~/.config/stkflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stkflash::SessionOptions;

use crate::CliError;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "stkflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Default board name.
    pub board: Option<String>,
    /// Read pages back after writing.
    #[serde(default)]
    pub verify: bool,
    /// Pause after each page write, in milliseconds.
    pub page_delay_ms: Option<u64>,
    /// Number of back-to-back sync rounds.
    pub sync_rounds: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from exactly one file (--config flag).
    ///
    /// Unlike the implicit locations, an explicitly named file must exist and
    /// parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid TOML in {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stkflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }

        if other.upload.board.is_some() {
            self.upload.board = other.upload.board;
        }
        if other.upload.verify {
            self.upload.verify = true;
        }
        if other.upload.page_delay_ms.is_some() {
            self.upload.page_delay_ms = other.upload.page_delay_ms;
        }
        if other.upload.sync_rounds.is_some() {
            self.upload.sync_rounds = other.upload.sync_rounds;
        }
    }

    /// Session options implied by this configuration.
    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::default().with_verify(self.upload.verify);
        if let Some(ms) = self.upload.page_delay_ms {
            options = options.with_page_write_delay(Duration::from_millis(ms));
        }
        if let Some(rounds) = self.upload.sync_rounds {
            if rounds == 0 {
                warn!("sync_rounds = 0 in config, using 1");
            }
            options = options.with_sync_rounds(rounds);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.upload.board.is_none());
        assert!(!config.upload.verify);
        assert!(config.upload.page_delay_ms.is_none());
        assert!(config.upload.sync_rounds.is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.upload.board = Some("uno".to_string());

        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyACM0".to_string());
        other.upload.board = Some("mega".to_string());
        other.upload.page_delay_ms = Some(10);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.upload.board.as_deref(), Some("mega"));
        assert_eq!(base.upload.page_delay_ms, Some(10));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.upload.sync_rounds = Some(5);

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.upload.sync_rounds, Some(5));
    }

    #[test]
    fn test_config_merge_verify_is_sticky() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.upload.verify = true;
        base.merge(other);
        base.merge(Config::default());
        assert!(base.upload.verify);
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyACM0"

[upload]
board = "nano"
verify = true
page_delay_ms = 8
sync_rounds = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.upload.board.as_deref(), Some("nano"));
        assert!(config.upload.verify);
        assert_eq!(config.upload.page_delay_ms, Some(8));
        assert_eq!(config.upload.sync_rounds, Some(2));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[upload]\nboard = \"mega\"\n").unwrap();
        assert!(config.connection.serial.is_none());
        assert_eq!(config.upload.board.as_deref(), Some("mega"));
        assert!(!config.upload.verify);
    }

    #[test]
    fn test_config_rejects_invalid_toml() {
        assert!(toml::from_str::<Config>("invalid toml [[[").is_err());
    }

    // ---- Session options ----

    #[test]
    fn test_session_options_defaults() {
        let options = Config::default().session_options();
        assert!(!options.verify);
        assert_eq!(options.sync_rounds, 3);
        assert_eq!(options.page_write_delay, Duration::from_millis(4));
    }

    #[test]
    fn test_session_options_from_config() {
        let mut config = Config::default();
        config.upload.verify = true;
        config.upload.page_delay_ms = Some(12);
        config.upload.sync_rounds = Some(1);

        let options = config.session_options();
        assert!(options.verify);
        assert_eq!(options.sync_rounds, 1);
        assert_eq!(options.page_write_delay, Duration::from_millis(12));
    }

    #[test]
    fn test_session_options_zero_sync_rounds_clamped() {
        let config: Config = toml::from_str("[upload]\nsync_rounds = 0\n").unwrap();
        assert_eq!(config.session_options().sync_rounds, 1);
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "[connection]\nserial = \"COM4\"\n[upload]\nboard = \"uno\"\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("COM4"));
        assert_eq!(config.upload.board.as_deref(), Some("uno"));
    }

    #[test]
    fn test_load_from_path_invalid_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[upload\nboard =").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("TOML")));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let err = Config::load_from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("stkflash"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
