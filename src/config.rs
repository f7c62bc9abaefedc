use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::ReadOptions;

/// Environment variable that replaces `api.base_url`.
pub const API_URL_ENV: &str = "ESG_DASH_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub search: SearchConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Backend origin, e.g. http://localhost:8000
  pub base_url: String,
  /// Prefix for analytics and prediction routes (health is served at the root)
  pub prefix: String,
  pub timeout_ms: u64,
  /// Extra attempts after a network error or timeout
  pub retry: u32,
  pub retry_delay_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      prefix: "/api".to_string(),
      timeout_ms: 10_000,
      retry: 2,
      retry_delay_ms: 1_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_time_secs: u64,
  pub cache_time_secs: u64,
  pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: 300,
      cache_time_secs: 600,
      cleanup_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub debounce_ms: u64,
  pub page_size: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 300,
      page_size: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./esg-dash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/esg-dash/config.yaml
  ///
  /// Without any file the defaults are used. `ESG_DASH_API_URL` then replaces
  /// the configured base URL.
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

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("esg-dash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("esg-dash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Replace the base URL, e.g. from the command line.
  pub fn with_api_url(mut self, url: impl Into<String>) -> Result<Self> {
    self.api.base_url = url.into();
    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<()> {
    self.api_url()?;
    if !self.api.prefix.is_empty() && !self.api.prefix.starts_with('/') {
      return Err(eyre!(
        "api.prefix must start with '/', got {:?}",
        self.api.prefix
      ));
    }
    if self.api.timeout_ms == 0 {
      return Err(eyre!("api.timeout_ms must be greater than zero"));
    }
    Ok(())
  }

  /// Parsed backend origin.
  pub fn api_url(&self) -> Result<Url> {
    let url = Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid API URL {:?}: {}", self.api.base_url, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("API URL must be http or https: {}", url));
    }
    Ok(url)
  }

  /// Prefix without a trailing slash.
  pub fn api_prefix(&self) -> &str {
    self.api.prefix.trim_end_matches('/')
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.api.timeout_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.api.retry_delay_ms)
  }

  pub fn read_options(&self) -> ReadOptions {
    ReadOptions::new(
      Duration::from_secs(self.cache.stale_time_secs),
      Duration::from_secs(self.cache.cache_time_secs),
    )
  }

  pub fn cleanup_interval(&self) -> Duration {
    Duration::from_secs(self.cache.cleanup_interval_secs.max(1))
  }

  pub fn debounce_delay(&self) -> Duration {
    Duration::from_millis(self.search.debounce_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api.base_url, "http://localhost:8000");
    assert_eq!(config.api_prefix(), "/api");
    assert_eq!(config.timeout(), Duration::from_secs(10));
    assert_eq!(config.api.retry, 2);
    assert_eq!(config.retry_delay(), Duration::from_secs(1));
    assert_eq!(config.read_options(), ReadOptions::default());
    assert_eq!(config.debounce_delay(), Duration::from_millis(300));
    assert_eq!(config.search.page_size, 10);
    assert_eq!(config.log.level, "info");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  base_url: https://esg.example.com\n  retry: 0\ncache:\n  stale_time_secs: 30\n"
    )
    .unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.api.base_url, "https://esg.example.com");
    assert_eq!(config.api.retry, 0);
    assert_eq!(config.api.timeout_ms, 10_000);
    assert_eq!(config.cache.stale_time_secs, 30);
    assert_eq!(config.cache.cache_time_secs, 600);
    assert_eq!(config.search.debounce_ms, 300);
  }

  #[test]
  fn test_empty_file_is_defaults() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.api.prefix, "/api");
  }

  #[test]
  fn test_missing_explicit_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_malformed_yaml_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api: [not, a, map]").unwrap();
    let err = Config::load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_invalid_url_rejected() {
    assert!(Config::default().with_api_url("not a url").is_err());
    assert!(Config::default().with_api_url("ftp://example.com").is_err());

    let config = Config::default()
      .with_api_url("http://10.0.0.5:9000")
      .unwrap();
    assert_eq!(config.api_url().unwrap().port(), Some(9000));
  }

  #[test]
  fn test_prefix_must_be_absolute() {
    let mut config = Config::default();
    config.api.prefix = "api".to_string();
    assert!(config.validate().is_err());

    config.api.prefix = "/api/".to_string();
    assert!(config.validate().is_ok());
    assert_eq!(config.api_prefix(), "/api");
  }
}
