use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Default cache generation tag. Bump on every deployment; activation
/// garbage-collects every tier whose name does not carry the current tag.
pub const DEFAULT_CACHE_VERSION: &str = "focusflow-v2";

/// Byte ceiling for the dynamic tier (50 MiB).
pub const DEFAULT_CACHE_SIZE_LIMIT: u64 = 50 * 1024 * 1024;

/// Entry-count ceiling for queued offline records.
pub const DEFAULT_MAX_OFFLINE_ENTRIES: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker fronts; relative manifest paths resolve against it.
  pub base_url: Url,

  /// Cache generation tag embedded in every tier name.
  #[serde(default = "default_cache_version")]
  pub cache_version: String,

  /// Path prefix identifying API requests (network-first routing).
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,

  /// App-shell asset manifest, pre-cached at install time. All-or-nothing:
  /// one missing asset fails the whole installation.
  #[serde(default = "default_asset_manifest")]
  pub asset_manifest: Vec<String>,

  /// Small set of assets re-fetched with cache bypass on every sync cycle.
  #[serde(default = "default_critical_assets")]
  pub critical_assets: Vec<String>,

  /// App-shell document served when navigation fails offline.
  #[serde(default = "default_app_shell")]
  pub app_shell: String,

  /// Icon served when an image asset is unavailable offline.
  #[serde(default = "default_icon")]
  pub default_icon: String,

  /// Endpoint receiving drained offline records (relative to base_url).
  #[serde(default = "default_sync_endpoint")]
  pub sync_endpoint: String,

  /// Endpoint receiving the accumulated activity record.
  #[serde(default = "default_activity_endpoint")]
  pub activity_endpoint: String,

  #[serde(default = "default_cache_size_limit")]
  pub cache_size_limit: u64,

  #[serde(default = "default_max_offline_entries")]
  pub max_offline_entries: usize,

  /// Seconds between periodic eviction passes on the dynamic tier.
  #[serde(default = "default_eviction_interval_secs")]
  pub eviction_interval_secs: u64,

  /// Seconds between sync attempts in daemon mode.
  #[serde(default = "default_sync_interval_secs")]
  pub sync_interval_secs: u64,
}

fn default_cache_version() -> String {
  DEFAULT_CACHE_VERSION.to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_asset_manifest() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
    "/sounds/rain.mp3",
    "/sounds/forest.mp3",
    "/sounds/cafe.mp3",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_critical_assets() -> Vec<String> {
  ["/", "/index.html", "/app.js"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_app_shell() -> String {
  "/".to_string()
}

fn default_icon() -> String {
  "/icons/icon-192.png".to_string()
}

fn default_sync_endpoint() -> String {
  "/api/sync".to_string()
}

fn default_activity_endpoint() -> String {
  "/api/activity/sync".to_string()
}

fn default_cache_size_limit() -> u64 {
  DEFAULT_CACHE_SIZE_LIMIT
}

fn default_max_offline_entries() -> usize {
  DEFAULT_MAX_OFFLINE_ENTRIES
}

fn default_eviction_interval_secs() -> u64 {
  60
}

fn default_sync_interval_secs() -> u64 {
  300
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ffsw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ffsw/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ffsw/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ffsw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ffsw").join("config.yaml");
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

  /// Resolve a manifest-relative path against the configured origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.base_url, e))
  }

  /// Configuration with the stock FocusFlow defaults, pointed at `base_url`.
  pub fn with_base_url(base_url: Url) -> Self {
    Self {
      base_url,
      cache_version: default_cache_version(),
      api_prefix: default_api_prefix(),
      asset_manifest: default_asset_manifest(),
      critical_assets: default_critical_assets(),
      app_shell: default_app_shell(),
      default_icon: default_icon(),
      sync_endpoint: default_sync_endpoint(),
      activity_endpoint: default_activity_endpoint(),
      cache_size_limit: default_cache_size_limit(),
      max_offline_entries: default_max_offline_entries(),
      eviction_interval_secs: default_eviction_interval_secs(),
      sync_interval_secs: default_sync_interval_secs(),
    }
  }
}
