//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/platesync/config.toml)
//! 3. Environment variables (PLATESYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "PLATESYNC";

/// Keys accepted by [`Config::set_value`]
pub const CONFIG_KEYS: &[&str] = &[
    "data_dir",
    "api_base_url",
    "max_retries",
    "action_timeout_secs",
    "cache_ttl_secs",
    "analysis_ttl_secs",
    "probe_addr",
    "probe_interval_secs",
    "log_file",
];

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the queue and cache database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL every endpoint is resolved against
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Delivery attempts per queued action before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// TTL for cached read responses
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// TTL for cached image analysis results
    #[serde(default = "default_analysis_ttl_secs")]
    pub analysis_ttl_secs: u64,

    /// `host:port` used to probe reachability (optional)
    #[serde(default)]
    pub probe_addr: Option<String>,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Write logs here instead of stderr (optional)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_base_url: default_api_base_url(),
            max_retries: default_max_retries(),
            action_timeout_secs: default_action_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            analysis_ttl_secs: default_analysis_ttl_secs(),
            probe_addr: None,
            probe_interval_secs: default_probe_interval_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PLATESYNC_DATA_DIR, PLATESYNC_API_URL, PLATESYNC_MAX_RETRIES)
    /// 2. Config file (~/.config/platesync/config.toml or PLATESYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` when given on the command line, otherwise the default location
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
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // PLATESYNC_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // PLATESYNC_API_URL
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.api_base_url = val;
            }
        }

        // PLATESYNC_MAX_RETRIES
        if let Ok(val) = std::env::var(format!("{}_MAX_RETRIES", ENV_PREFIX)) {
            self.max_retries = val
                .parse()
                .with_context(|| format!("Invalid {}_MAX_RETRIES: {:?}", ENV_PREFIX, val))?;
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
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Update one field from its string form
    ///
    /// Optional fields are cleared with an empty string or `none`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |value: &str| {
            if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            }
        };

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "api_base_url" => {
                url::Url::parse(value).with_context(|| format!("Invalid URL: {}", value))?;
                self.api_base_url = value.to_string();
            }
            "max_retries" => self.max_retries = parse_number(key, value)?,
            "action_timeout_secs" => {
                let secs: u64 = parse_number(key, value)?;
                if secs == 0 {
                    bail!("Invalid value for {}: must be at least 1 second", key);
                }
                self.action_timeout_secs = secs;
            }
            "cache_ttl_secs" => self.cache_ttl_secs = parse_number(key, value)?,
            "analysis_ttl_secs" => self.analysis_ttl_secs = parse_number(key, value)?,
            "probe_addr" => self.probe_addr = optional(value),
            "probe_interval_secs" => self.probe_interval_secs = parse_number(key, value)?,
            "log_file" => self.log_file = optional(value).map(PathBuf::from),
            _ => bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PLATESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("platesync")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("platesync.db")
    }

    /// `host:port` to probe: `probe_addr`, else the API host
    pub fn probe_target(&self) -> Option<String> {
        if let Some(ref addr) = self.probe_addr {
            return Some(addr.clone());
        }
        let url = url::Url::parse(&self.api_base_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }

    /// Per-action delivery timeout; a zero in the file is treated as one second
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn analysis_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_ttl_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: expected a non-negative integer", key))
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platesync")
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api/".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_action_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_analysis_ttl_secs() -> u64 {
    86_400
}

fn default_probe_interval_secs() -> u64 {
    15
}
