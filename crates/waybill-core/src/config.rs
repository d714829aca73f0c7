//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/waybill/config.toml)
//! 3. Environment variables (WAYBILL_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::adapter::{ApiVersion, DEFAULT_VERSION_THRESHOLD};

/// Environment variable prefix
const ENV_PREFIX: &str = "WAYBILL";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Backend base URL; the client stays offline-only when unset
    #[serde(default)]
    pub server_url: Option<String>,

    /// Reachability target, defaults to the server URL
    #[serde(default)]
    pub probe_url: Option<String>,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Must stay below `probe_interval_secs`
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Bound on each remote call during a drain pass
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Pinned backend API version (e.g. "17.0"); asked from the server when unset
    #[serde(default)]
    pub api_version: Option<String>,

    /// API major version at which the current field names start
    #[serde(default = "default_version_threshold")]
    pub version_threshold: u32,

    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: None,
            probe_url: None,
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            api_version: None,
            version_threshold: default_version_threshold(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (WAYBILL_DATA_DIR, WAYBILL_SERVER_URL, ...)
    /// 2. Config file (~/.config/waybill/config.toml or WAYBILL_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Some(val) = env_var("SERVER_URL") {
            self.server_url = non_empty(val);
        }
        if let Some(val) = env_var("PROBE_URL") {
            self.probe_url = non_empty(val);
        }
        if let Some(val) = env_var("PROBE_INTERVAL_SECS") {
            self.probe_interval_secs = parse_env("PROBE_INTERVAL_SECS", &val)?;
        }
        if let Some(val) = env_var("PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse_env("PROBE_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = env_var("CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = parse_env("CALL_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = env_var("API_VERSION") {
            self.api_version = non_empty(val);
        }
        if let Some(val) = env_var("VERSION_THRESHOLD") {
            self.version_threshold = parse_env("VERSION_THRESHOLD", &val)?;
        }
        if let Some(val) = env_var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = env_var("LOG_FILE") {
            self.log_file = non_empty(val).map(PathBuf::from);
        }
        Ok(())
    }

    /// Reject timing combinations the monitor and engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_secs == 0 {
            bail!("probe_interval_secs must be greater than zero");
        }
        if self.probe_timeout_secs == 0 {
            bail!("probe_timeout_secs must be greater than zero");
        }
        if self.call_timeout_secs == 0 {
            bail!("call_timeout_secs must be greater than zero");
        }
        if self.probe_timeout_secs >= self.probe_interval_secs {
            bail!(
                "probe_timeout_secs ({}) must be less than probe_interval_secs ({})",
                self.probe_timeout_secs,
                self.probe_interval_secs
            );
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with WAYBILL_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("waybill")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("waybill.db")
    }

    /// URL the connectivity monitor probes
    pub fn effective_probe_url(&self) -> Option<&str> {
        self.probe_url.as_deref().or(self.server_url.as_deref())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Backend version pinned in configuration, if any
    pub fn pinned_api_version(&self) -> Option<ApiVersion> {
        self.api_version.as_deref().map(ApiVersion::parse)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

fn parse_env<T: FromStr>(name: &str, val: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    val.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}_{}: '{}'", ENV_PREFIX, name, val))
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waybill")
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_call_timeout_secs() -> u64 {
    15
}

fn default_version_threshold() -> u32 {
    DEFAULT_VERSION_THRESHOLD
}

fn default_log_level() -> String {
    "info".to_string()
}
