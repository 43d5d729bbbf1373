use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_origin() -> String {
  "http://localhost:4000".to_string()
}

/// Static assets fetched into the precache at install time: the deployed
/// app shell plus the web-font stylesheet it links.
fn default_precache() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/manifest.json",
    "/styles.css",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;600&display=swap",
  ]
  .iter()
  .map(|asset| asset.to_string())
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin server the controller fronts.
  #[serde(default = "default_origin")]
  pub origin: String,
  /// Generation version. Bump on every deployment that changes the
  /// precache manifest, or stale assets will be served indefinitely.
  pub version: String,
  /// Static asset manifest for the precache.
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Cache database location (defaults to the platform data directory).
  pub cache_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./snapcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/snapcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/snapcache/config.yaml\n\
                 with at least a `version:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("snapcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("snapcache").join("config.yaml");
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
