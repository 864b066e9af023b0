//! Configuration management for the dev console.
//!
//! Settings come from a TOML file, created with defaults when missing, and
//! are then overridden by command-line options.

use crate::cli::CliArgs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Log levels accepted in the `[logging]` section.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub console: ConsoleSettings,
    #[serde(default)]
    pub servers: ServerDefaults,
    #[serde(default)]
    pub extensions: ExtensionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Console behaviour and storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Root data directory; server records live in `<data_dir>/servers`
    pub data_dir: String,
    /// Interactive prompt
    pub prompt: String,
    /// Whether the banner is shown before the interactive prompt
    pub show_banner: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            prompt: "mock> ".to_string(),
            show_banner: true,
        }
    }
}

/// Values used by `create` when the command leaves them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    pub default_port: u16,
    pub default_motd: String,
    pub max_players: usize,
    pub history_limit: usize,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            default_port: 25565,
            default_motd: "A Mock Server".to_string(),
            max_players: 20,
            history_limit: 100,
        }
    }
}

/// Extension discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// Directory scanned for `*.hook.toml` files
    pub directory: String,
    /// Whether extensions are applied at startup
    pub auto_load: bool,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            directory: "extensions".to_string(),
            auto_load: true,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if tokio::fs::try_exists(path).await.map_err(io_error)? {
            let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }
            tokio::fs::write(path, toml_content).await.map_err(io_error)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.data_dir {
            self.console.data_dir = dir.display().to_string();
        }
        if let Some(dir) = &args.extensions_dir {
            self.extensions.directory = dir.display().to_string();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.to_lowercase();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Directory of server record files.
    pub fn servers_dir(&self) -> PathBuf {
        Path::new(&self.console.data_dir).join("servers")
    }

    pub fn extensions_dir(&self) -> PathBuf {
        PathBuf::from(&self.extensions.directory)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.console.data_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("console.data_dir cannot be empty".to_string()));
        }

        if self.extensions.directory.trim().is_empty() {
            return Err(ConfigError::Invalid("extensions.directory cannot be empty".to_string()));
        }

        if self.servers.max_players == 0 {
            return Err(ConfigError::Invalid("servers.max_players must be at least 1".to_string()));
        }
        if self.servers.history_limit == 0 {
            return Err(ConfigError::Invalid("servers.history_limit must be at least 1".to_string()));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.console.data_dir, "data");
        assert_eq!(config.console.prompt, "mock> ");
        assert!(config.console.show_banner);
        assert_eq!(config.servers.default_port, 25565);
        assert_eq!(config.servers.max_players, 20);
        assert_eq!(config.servers.history_limit, 100);
        assert_eq!(config.extensions.directory, "extensions");
        assert!(config.extensions.auto_load);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("console.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            file.path(),
            "[servers]\ndefault_port = 30000\n\n[logging]\nlevel = \"debug\"\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.servers.default_port, 30000);
        assert_eq!(config.servers.default_motd, "A Mock Server");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.console, ConsoleSettings::default());
    }

    #[tokio::test]
    async fn test_invalid_toml_is_a_parse_error() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[servers\n").await.unwrap();
        let result = AppConfig::load_from_file(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.servers.max_players = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.console.data_dir = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            data_dir: Some(PathBuf::from("/srv/mock")),
            extensions_dir: Some(PathBuf::from("/srv/ext")),
            log_level: Some("WARN".to_string()),
            json_logs: true,
            ..CliArgs::default()
        };
        config.apply_cli(&args);
        assert_eq!(config.servers_dir(), PathBuf::from("/srv/mock/servers"));
        assert_eq!(config.extensions_dir(), PathBuf::from("/srv/ext"));
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }
}
