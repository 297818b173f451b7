//! Proxy configuration
//!
//! Loaded once at startup and handed to the components that need it; there
//! is no process-wide "current" configuration.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{ProxyError, Result};
use crate::transport::QueueOptions;

/// Prefix for environment overrides, e.g. `ARIPROXY__ARI_PASSWORD`
pub const ENV_PREFIX: &str = "ARIPROXY";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Identifies this proxy instance in every published message
    pub server_id: String,
    pub ari_hostname: String,
    pub ari_port: u16,
    pub ari_username: String,
    pub ari_password: String,
    /// Stasis applications proxied at startup
    pub applications: Vec<String>,
    pub admin_bind_address: String,
    /// Close a dialogue once the entity that created it leaves the application
    pub close_dialogue_on_primary_end: bool,
    pub command_timeout_ms: u64,
    pub log_level: String,
    pub backend: BackendConfig,
}

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub dialogue_queue: QueueConfig,
    pub application_queue: QueueConfig,
    /// Enables the health monitor
    pub check_for_closed_dialogues: bool,
    pub health_check_interval_ms: u64,
    /// Commands accepted from a dialogue's queue but not yet executed
    pub command_buffer: usize,
}

/// Declaration flags applied to a family of queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub ttl_ms: Option<u64>,
}

impl QueueConfig {
    /// Transport options for a queue declared with these settings
    pub fn to_options(&self) -> QueueOptions {
        QueueOptions {
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            ttl: self.ttl_ms.map(Duration::from_millis),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_id: "ariproxy".to_string(),
            ari_hostname: "127.0.0.1".to_string(),
            ari_port: 8088,
            ari_username: "asterisk".to_string(),
            ari_password: "asterisk".to_string(),
            applications: Vec::new(),
            admin_bind_address: "127.0.0.1:9000".to_string(),
            close_dialogue_on_primary_end: true,
            command_timeout_ms: 10_000,
            log_level: "info".to_string(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dialogue_queue: QueueConfig {
                auto_delete: true,
                ..Default::default()
            },
            application_queue: QueueConfig {
                durable: true,
                ..Default::default()
            },
            check_for_closed_dialogues: true,
            health_check_interval_ms: 5_000,
            command_buffer: 64,
        }
    }
}

impl BackendConfig {
    /// Interval between dialogue health passes
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl ProxyConfig {
    /// Load a JSON configuration file, applying `ARIPROXY__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ProxyError::config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: ProxyConfig = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration back to disk as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "Saved configuration");
        Ok(())
    }

    /// Reject settings the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server_id.trim().is_empty() {
            return Err(ProxyError::config("server_id must not be empty"));
        }
        if self.ari_hostname.trim().is_empty() {
            return Err(ProxyError::config("ari_hostname must not be empty"));
        }
        if self.ari_port == 0 {
            return Err(ProxyError::config("ari_port must not be 0"));
        }
        if self.backend.health_check_interval_ms == 0 {
            return Err(ProxyError::config("backend.health_check_interval_ms must be positive"));
        }
        if self.backend.command_buffer == 0 {
            return Err(ProxyError::config("backend.command_buffer must be positive"));
        }
        Ok(())
    }

    /// Timeout applied to each REST call made for a command
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Base URL of the ARI REST interface
    pub fn ari_base_url(&self) -> String {
        format!("http://{}:{}/ari", self.ari_hostname, self.ari_port)
    }

    /// URL of the ARI event WebSocket, without query parameters
    pub fn ari_events_url(&self) -> String {
        format!("ws://{}:{}/ari/events", self.ari_hostname, self.ari_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.health_check_interval(), Duration::from_secs(5));
        assert_eq!(config.ari_base_url(), "http://127.0.0.1:8088/ari");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.json");

        let mut config = ProxyConfig::default();
        config.server_id = "edge-1".to_string();
        config.applications = vec!["app1".to_string(), "app2".to_string()];
        config.backend.dialogue_queue.ttl_ms = Some(60_000);
        config.save(&path).unwrap();

        let loaded = ProxyConfig::load(&path).unwrap();
        assert_eq!(loaded.server_id, "edge-1");
        assert_eq!(loaded.applications, vec!["app1", "app2"]);
        assert_eq!(loaded.backend.dialogue_queue.ttl_ms, Some(60_000));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"server_id": "partial", "ari_port": 8089}"#).unwrap();

        let loaded = ProxyConfig::load(&path).unwrap();
        assert_eq!(loaded.server_id, "partial");
        assert_eq!(loaded.ari_port, 8089);
        assert!(loaded.close_dialogue_on_primary_end);
        assert_eq!(loaded.backend.command_buffer, 64);
    }

    #[test]
    fn test_missing_file() {
        let result = ProxyConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let mut config = ProxyConfig::default();
        config.backend.health_check_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
