//! Settings file management

use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;

/// Environment variable overriding the module connection string
pub const MODULE_CONNECTION_STRING_ENV: &str = "LENSGATE_MODULE_CONNECTION_STRING";

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write logs to a daily-rolled file under the storage layout
    #[serde(default)]
    pub log_to_file: bool,

    /// Emit JSON-formatted logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Storage paths
    #[serde(default)]
    pub storage: StorageSettings,

    /// Health check tuning
    #[serde(default)]
    pub health: HealthSettings,

    /// Hub transport configuration
    #[serde(default)]
    pub hub: HubSettings,

    /// Module connection string. The `LENSGATE_MODULE_CONNECTION_STRING`
    /// environment variable takes precedence when set.
    #[serde(default)]
    pub module_connection_string: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_json: false,
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            health: HealthSettings::default(),
            hub: HubSettings::default(),
            module_connection_string: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; a missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let file = File::new(path.as_ref());
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json()
            .await
            .map_err(|e| GatewayError::SettingsError(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// The module connection string with the environment override applied.
    pub fn module_connection_string(&self) -> Option<SecretString> {
        std::env::var(MODULE_CONNECTION_STRING_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.module_connection_string.clone())
            .map(SecretString::from)
    }

    /// Storage layout for the configured root.
    pub fn storage_layout(&self) -> StorageLayout {
        match &self.storage.root {
            Some(root) => StorageLayout::new(root),
            None => StorageLayout::default(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Enable the control-plane HTTP server
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Bind host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    9014
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enable: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Storage path settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Base directory for state and logs; platform default when unset
    #[serde(default)]
    pub root: Option<String>,

    /// Directory holding the graph template documents; defaults to the
    /// `content` directory under the storage root
    #[serde(default)]
    pub content_dir: Option<String>,
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Seconds between health ticks
    #[serde(default = "default_health_interval")]
    pub check_interval_secs: u64,

    /// Consecutive non-Good ticks before a restart is triggered
    #[serde(default = "default_health_retries")]
    pub check_retries: u32,

    /// Grace period between the restart events and the restart signal
    #[serde(default = "default_restart_grace")]
    pub restart_grace_secs: u64,

    /// How long a camera connect waits for its first settings pass
    #[serde(default = "default_first_sync_timeout")]
    pub first_sync_timeout_secs: u64,
}

fn default_health_interval() -> u64 {
    15
}

fn default_health_retries() -> u32 {
    3
}

fn default_restart_grace() -> u64 {
    10
}

fn default_first_sync_timeout() -> u64 {
    60
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_health_interval(),
            check_retries: default_health_retries(),
            restart_grace_secs: default_restart_grace(),
            first_sync_timeout_secs: default_first_sync_timeout(),
        }
    }
}

/// Hub transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Optional path to a PEM-encoded CA certificate for TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// SAS token lifetime in seconds
    #[serde(default = "default_sas_ttl")]
    pub sas_ttl_secs: u64,
}

fn default_sas_ttl() -> u64 {
    3600
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            sas_ttl_secs: default_sas_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_takes_all_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();

        assert_eq!(settings.log_level, LogLevel::Info);
        assert!(settings.server.enable);
        assert_eq!(settings.server.port, 9014);
        assert_eq!(settings.health.check_retries, 3);
        assert_eq!(settings.health.first_sync_timeout_secs, 60);
        assert_eq!(settings.hub.sas_ttl_secs, 3600);
        assert!(settings.module_connection_string.is_none());
    }

    #[test]
    fn test_partial_document_keeps_sibling_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "log_level": "debug",
                "server": { "port": 8080 },
                "health": { "check_interval_secs": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.health.check_interval_secs, 5);
        assert_eq!(settings.health.check_retries, 3);
    }

    #[test]
    fn test_storage_layout_honors_root() {
        let settings: Settings =
            serde_json::from_str(r#"{ "storage": { "root": "/data/lensgate" } }"#).unwrap();

        assert_eq!(
            settings.storage_layout().base_dir,
            std::path::PathBuf::from("/data/lensgate")
        );
    }
}
