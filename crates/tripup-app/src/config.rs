//! Host configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use tripup_core::defaults::{API_TIMEOUT_SECS, DATABASE_FILE, TRANSFER_TIMEOUT_SECS};
use tripup_core::{Error, Result};
use tripup_sync::SyncConfig;

/// Where the host keeps its data and which services it talks to.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database, renditions and scratch files.
    pub data_dir: PathBuf,
    /// Directory standing in for the device photo library.
    pub library_dir: PathBuf,
    pub api_url: String,
    pub storage_url: String,
    /// Bearer token for the API and storage.
    pub token: Option<String>,
    /// User keypair written by `tripup-keys`.
    pub key_file: PathBuf,
    /// Overrides the database inside `data_dir`.
    pub database_url: Option<String>,
    pub owner_id: Uuid,
    pub api_timeout: Duration,
    pub transfer_timeout: Duration,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load from process environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRIPUP_DATA_DIR` | `./tripup-data` | Local data directory |
    /// | `TRIPUP_DATABASE_URL` | `{data}/tripup.sqlite` | SQLite database URL |
    /// | `TRIPUP_LIBRARY_DIR` | `./library` | Photo library directory |
    /// | `TRIPUP_API_URL` | required | REST API base URL |
    /// | `TRIPUP_STORAGE_URL` | `TRIPUP_API_URL` | Blob storage base URL |
    /// | `TRIPUP_API_TOKEN` | none | Bearer token |
    /// | `TRIPUP_USER_KEY_FILE` | `{data}/user.key` | User keypair file |
    /// | `TRIPUP_USER_ID` | required | Owner of new assets |
    /// | `TRIPUP_API_TIMEOUT_SECS` | `30` | API request timeout |
    /// | `TRIPUP_TRANSFER_TIMEOUT_SECS` | `300` | Blob transfer timeout |
    ///
    /// Pipeline tunables are read by [`SyncConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.sync = SyncConfig::from_env();
        Ok(config)
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{key} must be set")))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => v
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::Config(format!("{key} must be a number of seconds"))),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let data_dir = PathBuf::from(get("TRIPUP_DATA_DIR").unwrap_or_else(|| "./tripup-data".to_string()));
        let api_url = required("TRIPUP_API_URL")?;
        let owner_id = required("TRIPUP_USER_ID")?
            .parse()
            .map_err(|_| Error::Config("TRIPUP_USER_ID must be a UUID".to_string()))?;

        Ok(Self {
            library_dir: PathBuf::from(get("TRIPUP_LIBRARY_DIR").unwrap_or_else(|| "./library".to_string())),
            storage_url: get("TRIPUP_STORAGE_URL").unwrap_or_else(|| api_url.clone()),
            token: get("TRIPUP_API_TOKEN").filter(|t| !t.is_empty()),
            key_file: get("TRIPUP_USER_KEY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("user.key")),
            database_url: get("TRIPUP_DATABASE_URL").filter(|u| !u.is_empty()),
            owner_id,
            api_timeout: seconds("TRIPUP_API_TIMEOUT_SECS", API_TIMEOUT_SECS)?,
            transfer_timeout: seconds("TRIPUP_TRANSFER_TIMEOUT_SECS", TRANSFER_TIMEOUT_SECS)?,
            sync: SyncConfig::default(),
            api_url,
            data_dir,
        })
    }

    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}?mode=rwc", self.data_dir.join(DATABASE_FILE).display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let owner = Uuid::new_v4();
        let config = AppConfig::from_lookup(lookup(&[
            ("TRIPUP_API_URL", "https://api.example.com"),
            ("TRIPUP_USER_ID", &owner.to_string()),
        ]))
        .unwrap();

        assert_eq!(config.owner_id, owner);
        assert_eq!(config.storage_url, "https://api.example.com");
        assert_eq!(config.key_file, PathBuf::from("./tripup-data/user.key"));
        assert_eq!(config.api_timeout, Duration::from_secs(API_TIMEOUT_SECS));
        assert!(config.token.is_none());
        assert!(config.database_url().ends_with("tripup.sqlite?mode=rwc"));
    }

    #[test]
    fn test_missing_api_url_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("TRIPUP_USER_ID", &Uuid::new_v4().to_string())]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("TRIPUP_API_URL")));
    }

    #[test]
    fn test_invalid_owner_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("TRIPUP_API_URL", "https://api.example.com"),
            ("TRIPUP_USER_ID", "not-a-uuid"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TRIPUP_API_URL", "https://api.example.com"),
            ("TRIPUP_STORAGE_URL", "https://blobs.example.com"),
            ("TRIPUP_USER_ID", &Uuid::new_v4().to_string()),
            ("TRIPUP_DATA_DIR", "/var/tripup"),
            ("TRIPUP_API_TOKEN", "secret"),
            ("TRIPUP_TRANSFER_TIMEOUT_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.storage_url, "https://blobs.example.com");
        assert_eq!(config.key_file, PathBuf::from("/var/tripup/user.key"));
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
        assert!(config.database_url().contains("/var/tripup/tripup.sqlite"));
    }

    #[test]
    fn test_database_url_override() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TRIPUP_API_URL", "https://api.example.com"),
            ("TRIPUP_USER_ID", &Uuid::new_v4().to_string()),
            ("TRIPUP_DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap();
        assert_eq!(config.database_url(), "sqlite::memory:");
    }
}
