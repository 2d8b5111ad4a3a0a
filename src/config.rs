use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default Story API base.
const DEFAULT_API_BASE: &str = "https://story-api.dicoding.dev/v1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the story API, including the version prefix.
  #[serde(default = "default_api_base")]
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_api_base(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Version tag embedded in cache partition names. Bump it to evict
  /// every previously cached response on the next run.
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Shell assets `cerita prefetch` loads into the cache.
  #[serde(default)]
  pub prefetch: Vec<String>,
  /// Override for the response cache database location.
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      prefetch: Vec::new(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Override for the story database location.
  pub path: Option<PathBuf>,
}

fn default_api_base() -> String {
  DEFAULT_API_BASE.to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cerita.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cerita/config.yaml
  ///
  /// Every setting has a default, so a missing config file simply yields
  /// the default configuration.
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
    let local = PathBuf::from("cerita.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cerita").join("config.yaml");
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
}

/// A signed-in session as persisted by `cerita login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub name: String,
}

impl Session {
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cerita").join("session.json"))
  }

  /// The active session token: CERITA_TOKEN environment variable first,
  /// then the persisted session file.
  pub fn token() -> Option<String> {
    if let Ok(token) = std::env::var("CERITA_TOKEN") {
      return Some(token);
    }
    Self::load().map(|session| session.token)
  }

  pub fn load() -> Option<Session> {
    let path = Self::default_path().ok()?;
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
  }

  pub fn save(&self) -> Result<()> {
    let path = Self::default_path()?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let contents = serde_json::to_string_pretty(self)?;
    std::fs::write(&path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", path.display(), e))?;

    Ok(())
  }
}
