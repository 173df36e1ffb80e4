//! Run configuration.
//!
//! Loaded from a YAML file named by `FLEETPACK_CONFIG` (default
//! `fleetpack.yaml`), falling back to defaults when the file is absent.
//! Secrets can be supplied through the environment instead of the file:
//! `DATABASE_URL` and `FLEETPACK_DIRECTORY_PASSWORD` override the YAML
//! values when set.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    /// Directory receiving the pre-run table backups.
    pub backup_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Width of the per-group fetch pool; sized near the expected group
    /// count ceiling so most groups fetch in one wave.
    pub fetch_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Topic prefix in front of the `coprocstatus/+` and `deviceinfo/+`
    /// patterns.
    pub topic_prefix: String,
    /// Telemetry collection window in seconds.
    pub collect_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub insert_workers: usize,
    /// Value written to the `updatedby` column of every inserted row.
    pub updated_by: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory: DirectoryConfig::default(),
            mqtt: MqttConfig::default(),
            database: DatabaseConfig::default(),
            backup_dir: "./backups".to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            username: String::new(),
            password: String::new(),
            fetch_workers: 63,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            topic_prefix: "fleet/layer5".to_string(),
            collect_window_secs: 120,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fleetpack".to_string(),
            insert_workers: 10,
            updated_by: "fleetpack".to_string(),
        }
    }
}

/// Loads the configuration, applying environment overrides last.
pub async fn load_config() -> AppConfig {
    let path = std::env::var("FLEETPACK_CONFIG").unwrap_or_else(|_| "fleetpack.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                warn!(path = %path, error = %e, "invalid config file, using defaults");
                AppConfig::default()
            })
        }
    } else {
        warn!(path = %path, "no config file, using defaults");
        AppConfig::default()
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        cfg.database.url = url;
    }
    if let Ok(password) = std::env::var("FLEETPACK_DIRECTORY_PASSWORD") {
        cfg.directory.password = password;
    }
    cfg
}
