//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/reconledger/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/reconledger/` (~/.config/reconledger/)
//! - Data: `$XDG_DATA_HOME/reconledger/` (~/.local/share/reconledger/)
//! - State/Logs: `$XDG_STATE_HOME/reconledger/` (~/.local/state/reconledger/)

use crate::db::session::RetryPolicy;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Workspace location
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Connection and retry tuning
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where workspace databases live
#[derive(Debug, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory holding one subdirectory per workspace
    pub root: Option<PathBuf>,

    /// Workspace used when the caller does not name one
    #[serde(default = "default_workspace_name")]
    pub default_name: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            default_name: default_workspace_name(),
        }
    }
}

impl WorkspaceConfig {
    /// Configured root, or `$XDG_DATA_HOME/reconledger/workspaces`
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(Config::workspaces_dir)
    }
}

fn default_workspace_name() -> String {
    "default".to_string()
}

/// SQLite connection tuning
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// How long SQLite itself waits on a locked database before reporting busy
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Retries for busy/locked transactions before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for the backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Retry policy used by the session manager
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms)),
        }
    }

    /// Busy timeout handed to SQLite
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.retry_backoff_ms == 0 && self.max_retries > 0 {
            return Err(Error::Config(
                "database.retry_backoff_ms must be positive when retries are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    25
}

fn default_max_backoff_ms() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.database.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/reconledger/config.toml` (~/.config/reconledger/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("reconledger").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/reconledger/` (~/.local/share/reconledger/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("reconledger")
    }

    /// Returns the default workspace root
    ///
    /// `$XDG_DATA_HOME/reconledger/workspaces/`
    pub fn workspaces_dir() -> PathBuf {
        Self::data_dir().join("workspaces")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/reconledger/` (~/.local/state/reconledger/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("reconledger")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("reconledger.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workspace.default_name, "default");
        assert!(config.workspace.root.is_none());
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.database.max_retries, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[workspace]
root = "/tmp/engagements"
default_name = "acme"

[database]
max_retries = 8
retry_backoff_ms = 10

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.workspace.root_dir(),
            PathBuf::from("/tmp/engagements")
        );
        assert_eq!(config.workspace.default_name, "acme");
        assert_eq!(config.database.max_retries, 8);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = DatabaseConfig {
            retry_backoff_ms: 40,
            max_backoff_ms: 10,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.initial_backoff, Duration::from_millis(40));
        // max never drops below the initial delay
        assert_eq!(policy.max_backoff, Duration::from_millis(40));
    }

    #[test]
    fn test_database_config_validation() {
        assert!(DatabaseConfig::default().validate().is_ok());

        let config = DatabaseConfig {
            retry_backoff_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DatabaseConfig {
            retry_backoff_ms: 0,
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
