use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::{RetryPolicy, ThrottlePolicy};

const LOCAL_CONFIG: &str = "savings-sync.yaml";
const APP_DIR: &str = "savings-sync";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub gateway: GatewayConfig,
  pub storage: StorageConfig,
  pub cache: CacheConfig,
  pub retry: RetryConfig,
  pub notifications: NotificationsConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  /// Base URL of the savings-group API
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080/api".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to the platform data dir)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_hours: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_hours: 24,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_action_attempts: u32,
  pub max_notification_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
  /// Passes per sync session
  pub max_passes: u32,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let actions = RetryPolicy::actions();
    Self {
      max_action_attempts: actions.max_attempts,
      max_notification_attempts: RetryPolicy::notifications().max_attempts,
      initial_backoff_ms: actions.initial_delay.as_millis() as u64,
      max_backoff_ms: actions.max_delay.as_millis() as u64,
      max_passes: 6,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub max_per_pass: usize,
  pub send_interval_ms: u64,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    let throttle = ThrottlePolicy::default();
    Self {
      max_per_pass: throttle.max_per_pass,
      send_interval_ms: throttle.send_interval.as_millis() as u64,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Directory for rolling log files (defaults to the platform data dir)
  pub directory: Option<PathBuf>,
  /// Filter directive; `RUST_LOG` takes precedence
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./savings-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/savings-sync/config.yaml
  ///
  /// With no file found the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  /// Implicit config locations, first match wins.
  fn candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(config_dir) = dirs::config_dir() {
      paths.push(config_dir.join(APP_DIR).join("config.yaml"));
    }
    paths
  }

  fn find_config_file() -> Option<PathBuf> {
    Self::candidates().into_iter().find(|p| p.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes as null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  fn validate(&self) -> Result<()> {
    if self.retry.max_action_attempts == 0 || self.retry.max_notification_attempts == 0 {
      return Err(eyre!("retry attempts must be at least 1"));
    }
    if self.retry.max_passes == 0 {
      return Err(eyre!("retry.max_passes must be at least 1"));
    }
    if self.notifications.max_per_pass == 0 {
      return Err(eyre!("notifications.max_per_pass must be at least 1"));
    }
    if self.cache.default_ttl_hours == 0 {
      return Err(eyre!("cache.default_ttl_hours must be at least 1"));
    }
    Ok(())
  }

  /// Get the gateway bearer token from the environment, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SAVINGS_SYNC_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  pub fn gateway_timeout(&self) -> Duration {
    Duration::from_secs(self.gateway.timeout_secs)
  }

  pub fn default_ttl(&self) -> chrono::Duration {
    chrono::Duration::hours(i64::from(self.cache.default_ttl_hours))
  }

  pub fn action_retry(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.retry.max_action_attempts,
      ..self.backoff()
    }
  }

  pub fn notification_retry(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.retry.max_notification_attempts,
      ..self.backoff()
    }
  }

  /// Wait between sync passes.
  pub fn backoff(&self) -> RetryPolicy {
    RetryPolicy {
      initial_delay: Duration::from_millis(self.retry.initial_backoff_ms),
      max_delay: Duration::from_millis(self.retry.max_backoff_ms),
      ..RetryPolicy::actions()
    }
  }

  pub fn throttle(&self) -> ThrottlePolicy {
    ThrottlePolicy {
      max_per_pass: self.notifications.max_per_pass,
      send_interval: Duration::from_millis(self.notifications.send_interval_ms),
    }
  }

  /// Directory for log files, falling back to the platform data dir.
  pub fn log_directory(&self) -> Option<PathBuf> {
    self
      .log
      .directory
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR).join("logs")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_queue_policies() {
    let config = Config::default();
    assert_eq!(config.action_retry().max_attempts, 5);
    assert_eq!(config.notification_retry().max_attempts, 3);
    assert_eq!(config.default_ttl(), chrono::Duration::hours(24));
    assert_eq!(config.throttle(), ThrottlePolicy::default());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let config = Config::parse(
      "gateway:\n  url: https://api.chama.example/v2\nretry:\n  max_action_attempts: 7\n",
    )
    .unwrap();
    assert_eq!(config.gateway.url, "https://api.chama.example/v2");
    assert_eq!(config.gateway.timeout_secs, 30);
    assert_eq!(config.action_retry().max_attempts, 7);
    assert_eq!(config.retry.max_notification_attempts, 3);
    assert_eq!(config.notifications.max_per_pass, 50);
  }

  #[test]
  fn test_empty_file_is_defaults() {
    let config = Config::parse("  \n").unwrap();
    assert_eq!(config.cache.default_ttl_hours, 24);
  }

  #[test]
  fn test_zero_bounds_are_rejected() {
    let mut config = Config::default();
    config.retry.max_passes = 0;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_current_directory_is_searched_first() {
    let candidates = Config::candidates();
    assert_eq!(candidates[0], PathBuf::from("savings-sync.yaml"));
    if dirs::config_dir().is_some() {
      assert_eq!(candidates.len(), 2);
      assert!(candidates[1].ends_with("savings-sync/config.yaml"));
    }
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());

    let present = dir.path().join("config.yaml");
    std::fs::write(&present, "cache:\n  default_ttl_hours: 6\n").unwrap();
    let config = Config::load(Some(&present)).unwrap();
    assert_eq!(config.default_ttl(), chrono::Duration::hours(6));
  }
}
