use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::agent::AgentConfig;

/// Generation name of the current release. Bump it to invalidate every
/// stored response on the next activation.
pub const DEFAULT_CACHE_NAME: &str = "attendance-pwa-v2";

/// Resources pre-fetched at install time.
pub const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/icon-192.png",
  "/icon-512.png",
  "https://fonts.googleapis.com/css2?family=Roboto:wght@300;400;500;700&display=swap",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
  "https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js",
];

pub const DEFAULT_FALLBACK_DOCUMENT: &str = "/index.html";

pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the application being cached
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Served to navigations when the network is unreachable
  #[serde(default = "default_fallback_document")]
  pub fallback_document: String,
  /// Cache database (defaults to $XDG_DATA_HOME/ocagent/cache.db)
  pub database: Option<PathBuf>,
  /// Write logs here instead of stderr
  pub log_file: Option<PathBuf>,
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

fn default_cache_name() -> String {
  DEFAULT_CACHE_NAME.to_string()
}

fn default_manifest() -> Vec<String> {
  DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect()
}

fn default_fallback_document() -> String {
  DEFAULT_FALLBACK_DOCUMENT.to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache_name: default_cache_name(),
      manifest: default_manifest(),
      fallback_document: default_fallback_document(),
      database: None,
      log_file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ocagent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ocagent/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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
    let local = PathBuf::from("ocagent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ocagent").join("config.yaml");
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

  /// Where the cache database lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ocagent").join("cache.db"))
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// The agent configuration for this version.
  pub fn agent_config(&self) -> Result<AgentConfig> {
    Ok(
      AgentConfig::new(self.cache_name.clone(), self.origin_url()?)
        .with_manifest(self.manifest.iter().cloned())
        .with_fallback_document(self.fallback_document.clone()),
    )
  }
}
