use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::net::{Request, RequestKey};
use crate::notify::Notification;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(flatten)]
  pub worker: WorkerConfig,
  pub storage: StorageConfig,
  /// Per-request network timeout
  pub request_timeout_secs: u64,
}

/// Everything the cache worker needs to know about the version it runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Version tag, also the name of the current cache partition
  pub version: String,
  /// Origin that manifest paths and the offline path are resolved against
  pub origin: Url,
  /// Resources that must be cached before the version may activate
  pub manifest: Vec<String>,
  /// Path of the page served when the network is unreachable
  pub offline_path: String,
  pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without a payload
  pub default_body: String,
  pub icon: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/offline-cache/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      worker: WorkerConfig::default(),
      storage: StorageConfig::default(),
      request_timeout_secs: 30,
    }
  }
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      version: "app-cache-v1".to_string(),
      origin: Url::parse("http://localhost:8000").expect("static origin is valid"),
      manifest: [
        "/",
        "/static/css/site.css",
        "/static/icons/icon-192.png",
        "/static/icons/icon-512.png",
        "/static/icons/favicon.ico",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      offline_path: "/offline/".to_string(),
      notification: NotificationConfig::default(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Loan Saathi Hub".to_string(),
      default_body: "Loan Saathi Hub Notification".to_string(),
      icon: "/static/icons/icon-192.png".to_string(),
    }
  }
}

impl WorkerConfig {
  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid resource path '{}': {}", path, e))
  }

  /// Requests for every manifest entry, in manifest order.
  pub fn manifest_requests(&self) -> Result<Vec<Request>> {
    self
      .manifest
      .iter()
      .map(|path| self.resolve(path).map(Request::get))
      .collect()
  }

  /// Cache key of the offline fallback page.
  pub fn offline_key(&self) -> Result<RequestKey> {
    self.resolve(&self.offline_path).map(|url| RequestKey::get(&url))
  }

  /// Notification for a push payload, falling back to the default body.
  pub fn notification_for(&self, payload: Option<&str>) -> Notification {
    let body = payload
      .filter(|p| !p.is_empty())
      .unwrap_or(&self.notification.default_body);

    Notification {
      title: self.notification.title.clone(),
      body: body.to_string(),
      icon: self.notification.icon.clone(),
    }
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Config 'version' must not be empty"));
    }
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("Config 'origin' must be a base URL: {}", self.origin));
    }
    // Surface bad manifest paths at load time instead of at install.
    self.manifest_requests()?;
    self.offline_key()?;
    Ok(())
  }
}

impl Config {
  /// Load configuration from file, or defaults when no file exists.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-cache/config.yaml
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

    if config.request_timeout_secs == 0 {
      return Err(eyre!("Config 'request_timeout_secs' must be positive"));
    }
    config.worker.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-cache").join("config.yaml");
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

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let worker = WorkerConfig::default();
    assert_eq!(worker.version, "app-cache-v1");
    assert_eq!(worker.manifest.len(), 5);
    assert_eq!(worker.manifest[0], "/");
    assert!(!worker.manifest.contains(&worker.offline_path));
  }

  #[test]
  fn test_manifest_resolves_against_origin() {
    let worker = WorkerConfig {
      origin: Url::parse("https://example.com/app/").unwrap(),
      manifest: vec!["/static/a.css".into(), "https://cdn.example.net/b.js".into()],
      ..WorkerConfig::default()
    };

    let requests = worker.manifest_requests().unwrap();
    let urls: Vec<_> = requests.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
      urls,
      vec![
        "https://example.com/static/a.css",
        "https://cdn.example.net/b.js"
      ]
    );
  }

  #[test]
  fn test_offline_key() {
    let worker = WorkerConfig::default();
    let key = worker.offline_key().unwrap();
    assert_eq!(key.method, "GET");
    assert_eq!(key.url, "http://localhost:8000/offline/");
  }

  #[test]
  fn test_notification_defaults_when_payload_missing() {
    let worker = WorkerConfig::default();

    let n = worker.notification_for(None);
    assert_eq!(n.title, "Loan Saathi Hub");
    assert_eq!(n.body, "Loan Saathi Hub Notification");
    assert_eq!(n.icon, "/static/icons/icon-192.png");

    assert_eq!(worker.notification_for(Some("")).body, n.body);
    assert_eq!(worker.notification_for(Some("Loan approved")).body, "Loan approved");
  }

  #[test]
  fn test_load_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      r#"
version: site-v7
origin: https://example.com
manifest:
  - /
  - /offline/
notification:
  title: Example
storage:
  path: /tmp/cache.db
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.worker.version, "site-v7");
    assert_eq!(config.worker.origin.as_str(), "https://example.com/");
    assert_eq!(config.worker.manifest, vec!["/", "/offline/"]);
    assert_eq!(config.worker.notification.title, "Example");
    // Unset nested fields keep their defaults
    assert_eq!(config.worker.notification.icon, "/static/icons/icon-192.png");
    assert_eq!(config.worker.offline_path, "/offline/");
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/cache.db")));
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_empty_version_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "version: \"  \"").unwrap();

    assert!(Config::load(Some(file.path())).is_err());
  }
}
