use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::records::CALORIES_TARGET_DEFAULT;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Directory holding the record and asset databases
  /// (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  /// How long cached lists and summaries stay fresh
  pub cache_ttl_secs: u32,
  /// Daily calorie goal used by the dashboard
  pub calories_target: u32,
  pub shell: ShellConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir: None,
      cache_ttl_secs: 30,
      calories_target: CALORIES_TARGET_DEFAULT,
      shell: ShellConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Origin the app shell is served from
  pub base_url: String,
  /// Paths (relative to base_url) cached at install time
  pub manifest: Vec<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8001/".to_string(),
      manifest: [
        "./",
        "index.html",
        "styles.css",
        "app.js",
        "manifest.json",
        "icons/icon-192.png",
        "icons/icon-512.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./healthlog.yaml (current directory)
  /// 3. The platform config dir (e.g. ~/.config/healthlog/config.yaml)
  ///
  /// With no file anywhere, every setting falls back to its default.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("healthlog.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("healthlog").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory for the databases, created on demand by the stores.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|d| d.join("healthlog"))
      .ok_or_else(|| eyre!("Could not determine a data directory; set data_dir in the config"))
  }

  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(i64::from(self.cache_ttl_secs))
  }

  pub fn shell_base(&self) -> Result<url::Url> {
    url::Url::parse(&self.shell.base_url)
      .map_err(|e| eyre!("Invalid shell base_url {}: {}", self.shell.base_url, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_apply_when_fields_are_missing() {
    let config: Config = serde_yaml::from_str("calories_target: 1800\n").unwrap();
    assert_eq!(config.calories_target, 1800);
    assert_eq!(config.cache_ttl_secs, 30);
    assert!(!config.shell.manifest.is_empty());
  }

  #[test]
  fn explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/healthlog.yaml")));
    assert!(err.is_err());
  }

  #[test]
  fn ttl_converts_to_duration() {
    let config = Config {
      cache_ttl_secs: 45,
      ..Config::default()
    };
    assert_eq!(config.ttl(), chrono::Duration::seconds(45));
  }
}
