//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the authentication endpoints, the public
//! route patterns and where session state is persisted.
//!
//! Configuration is stored at `~/.config/backoffice/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{AuthEndpoints, ReqwestTransport};
use crate::auth::{CredentialStore, FileStore, KeyValueStore, KeyringStore, MemoryStore};
use crate::session::{Navigator, PublicRoutes, SessionCoordinator, SessionRoutes};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "backoffice";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where session state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
    Keyring,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "keyring" | "keychain" => Ok(Self::Keyring),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Client-side route of the login screen
    pub login_route: String,
    /// Endpoints that never need a bearer token (`/exact` or `/prefix/*`)
    pub public_routes: Vec<String>,
    pub request_timeout_secs: u64,
    /// Give up on a stalled token refresh after this many seconds; unset waits forever
    pub refresh_timeout_secs: Option<u64>,
    pub storage: StorageBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let endpoints = AuthEndpoints::default();
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            public_routes: vec![endpoints.login.clone(), "/auth/password/*".to_string()],
            login_path: endpoints.login,
            refresh_path: endpoints.refresh,
            logout_path: endpoints.logout,
            login_route: "/login".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: None,
            storage: StorageBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override fields from `BACKOFFICE_BASE_URL` and `BACKOFFICE_STORAGE`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(base_url) = std::env::var("BACKOFFICE_BASE_URL") {
            self.base_url = base_url;
        }
        if let Ok(storage) = std::env::var("BACKOFFICE_STORAGE") {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            login: self.login_path.clone(),
            refresh: self.refresh_path.clone(),
            logout: self.logout_path.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_secs.map(Duration::from_secs)
    }

    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.storage {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => Arc::new(FileStore::new(self.storage_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStore::new()),
        })
    }

    /// Wire a coordinator over HTTP using this configuration.
    pub fn build_coordinator(&self, navigator: Arc<dyn Navigator>) -> Result<SessionCoordinator> {
        let transport = ReqwestTransport::new(self.base_url.clone(), self.request_timeout())
            .context("Failed to build HTTP client")?;
        let store = Arc::new(CredentialStore::new(self.open_storage()?));
        let routes = SessionRoutes::new(
            self.login_route.clone(),
            PublicRoutes::new(&self.public_routes).into_predicate(),
        );

        Ok(
            SessionCoordinator::new(Arc::new(transport), self.endpoints(), store, routes, navigator)
                .with_refresh_timeout(self.refresh_timeout()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.refresh_path, "/auth/refresh-token");
        assert_eq!(config.refresh_timeout(), None);
        assert_eq!(config.storage, StorageBackend::File);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            base_url: "https://admin.example.com/api".to_string(),
            refresh_timeout_secs: Some(15),
            storage: StorageBackend::Keyring,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.base_url, "https://admin.example.com/api");
        assert_eq!(loaded.refresh_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(loaded.storage, StorageBackend::Keyring);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"base_url": "https://x.test", "storage": "memory"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_url, "https://x.test");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.login_route, "/login");
        assert!(config.public_routes.contains(&"/auth/login".to_string()));
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("Keychain".parse::<StorageBackend>().unwrap(), StorageBackend::Keyring);
        assert_eq!(" file ".parse::<StorageBackend>().unwrap(), StorageBackend::File);
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
