use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Compiled-in connection defaults; persisted overrides win over these
  #[serde(default)]
  pub connection: ConnectionConfig,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub location: LocationConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Directory for the store and log files (defaults to $XDG_DATA_HOME/fieldsync)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
  /// Per-request timeout. Expiry counts as a network failure.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl HttpConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_timeout_secs() -> u64 {
  30
}

/// Replay retry budget for queued actions.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Total attempts per action, including the first. 1 disables retries.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay_ms(),
      max_delay_ms: default_max_delay_ms(),
    }
  }
}

fn default_max_attempts() -> u32 {
  3
}

fn default_base_delay_ms() -> u64 {
  500
}

fn default_max_delay_ms() -> u64 {
  8_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for LocationConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
    }
  }
}

impl LocationConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

fn default_interval_secs() -> u64 {
  5 * 60
}

/// TTLs for the read endpoints served through the resource cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_tracker_ttl_secs")]
  pub tracker_ttl_secs: u64,
  #[serde(default = "default_eta_ttl_secs")]
  pub eta_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      tracker_ttl_secs: default_tracker_ttl_secs(),
      eta_ttl_secs: default_eta_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn tracker_ttl(&self) -> Duration {
    Duration::from_secs(self.tracker_ttl_secs)
  }

  pub fn eta_ttl(&self) -> Duration {
    Duration::from_secs(self.eta_ttl_secs)
  }
}

fn default_tracker_ttl_secs() -> u64 {
  30
}

fn default_eta_ttl_secs() -> u64 {
  60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Some(key) = Self::api_key_from_env() {
      config.connection.api_key = key;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Default API key from the environment, if set.
  fn api_key_from_env() -> Option<String> {
    std::env::var("FIELDSYNC_API_KEY")
      .ok()
      .filter(|key| !key.is_empty())
  }

  /// Directory holding the store and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();

    assert_eq!(config.http.timeout(), Duration::from_secs(30));
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.location.interval(), Duration::from_secs(300));
    assert_eq!(config.connection, ConnectionConfig::default());
  }

  #[test]
  fn test_partial_sections() {
    let yaml = r#"
connection:
  api_key: flb_live_abc
  api_host: https://fleet.example.com
queue:
  max_attempts: 1
cache:
  eta_ttl_secs: 5
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.connection.api_key, "flb_live_abc");
    assert_eq!(config.connection.api_host, "https://fleet.example.com");
    // Fields not named keep their defaults
    assert_eq!(
      config.connection.socket_port,
      ConnectionConfig::default().socket_port
    );
    assert_eq!(config.queue.max_attempts, 1);
    assert_eq!(config.queue.base_delay_ms, 500);
    assert_eq!(config.cache.eta_ttl(), Duration::from_secs(5));
    assert_eq!(config.cache.tracker_ttl(), Duration::from_secs(30));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/nonexistent/fieldsync.yaml")));
    assert!(result.is_err());
  }
}
