//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs the values it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedcastSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub delivery: DeliverySettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

/// HTTP ingestion endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_ms: 10_000,
        }
    }
}

/// SQLite store and change-feed polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: feedcast_home().join("feedcast.db"),
            poll_interval_ms: 250,
            batch_size: 100,
        }
    }
}

impl StorageSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Push delivery through FCM.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Registration token every notification is sent to.
    pub target: String,
    /// Firebase project. Taken from the service-account key when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Service-account key file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
    /// Pre-issued OAuth2 bearer token, used instead of a key file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub endpoint: String,
    pub request_timeout_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            target: String::new(),
            project_id: None,
            credentials_file: None,
            access_token: None,
            endpoint: "https://fcm.googleapis.com".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl DeliverySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Backoff for delivery retries and feed reconnects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    pub json: bool,
    /// 0 disables the periodic metrics log.
    pub metrics_interval_secs: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            metrics_interval_secs: 60,
        }
    }
}

impl FeedcastSettings {
    /// Startup checks. Any error here is fatal: there is no degraded mode.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.target.trim().is_empty() {
            return Err(SettingsError::Missing("delivery.target"));
        }
        let has_token = self
            .delivery
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if !has_token && self.delivery.credentials_file.is_none() {
            return Err(SettingsError::Missing(
                "delivery.credentialsFile or delivery.accessToken",
            ));
        }
        if self.delivery.credentials_file.is_none() && self.delivery.project_id.is_none() {
            return Err(SettingsError::Missing("delivery.projectId"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "retry.baseDelayMs exceeds retry.maxDelayMs".into(),
            ));
        }
        if self.storage.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "storage.pollIntervalMs must be positive".into(),
            ));
        }
        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(SettingsError::InvalidValue(format!(
                "logging.level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// `~/.feedcast`, falling back to `/tmp/.feedcast` without a home directory.
pub fn feedcast_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".feedcast")
}
