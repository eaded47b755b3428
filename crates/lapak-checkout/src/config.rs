//! # Checkout Configuration
//!
//! Configuration for the checkout service.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LAPAK_DATABASE_PATH=/var/lib/lapak/lapak.db                        │
//! │     LAPAK_LINK_SIGNING_SECRET=...                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     lapak.toml                                                         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/lapak/lapak.db"
//! max_connections = 8
//!
//! [downloads]
//! base_url = "https://dl.lapak.id/d"
//! signing_secret = "change-me-please-32-bytes-minimum"
//! link_ttl_secs = 3600
//! max_attempts = 5
//! attempt_window_secs = 3600
//!
//! [gateway]
//! timeout_secs = 10
//! success_redirect_url = "https://lapak.id/orders"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use lapak_db::DbConfig;

/// Minimum signing secret length in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Invalid checkout configuration: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./lapak.db")
}

fn default_max_connections() -> u32 {
    8
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Signed download links and attempt limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Links look like `{base_url}/{file_ref}?buyer=..&order=..&expires=..&sig=..`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HMAC key. Must be set outside development.
    #[serde(default)]
    pub signing_secret: String,

    #[serde(default = "default_link_ttl")]
    pub link_ttl_secs: u64,

    /// Attempts allowed per link within `attempt_window_secs`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    #[serde(default = "default_attempt_window")]
    pub attempt_window_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/d".to_string()
}

fn default_link_ttl() -> u64 {
    3600
}

fn default_max_attempts() -> i64 {
    5
}

fn default_attempt_window() -> u64 {
    3600
}

impl Default for DownloadSettings {
    fn default() -> Self {
        DownloadSettings {
            base_url: default_base_url(),
            signing_secret: String::new(),
            link_ttl_secs: default_link_ttl(),
            max_attempts: default_max_attempts(),
            attempt_window_secs: default_attempt_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Upper bound on any single gateway call.
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Where the gateway sends the buyer after paying.
    #[serde(default)]
    pub success_redirect_url: Option<String>,
}

fn default_gateway_timeout() -> u64 {
    10
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            timeout_secs: default_gateway_timeout(),
            success_redirect_url: None,
        }
    }
}

// =============================================================================
// Checkout Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub downloads: DownloadSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,
}

impl CheckoutConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file, if `path` is given and exists
    /// 3. Environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!(?path, "Loading checkout config from file");
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml(&contents)?
            }
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without validating it.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.downloads.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "downloads.signing_secret must be at least {} bytes",
                MIN_SIGNING_SECRET_LEN
            )));
        }

        if !self.downloads.base_url.starts_with("http://")
            && !self.downloads.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "downloads.base_url must start with http:// or https://, got: {}",
                self.downloads.base_url
            )));
        }

        if self.downloads.link_ttl_secs == 0 || self.downloads.attempt_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "download link TTL and attempt window must be greater than 0".into(),
            ));
        }

        if self.downloads.max_attempts <= 0 {
            return Err(ConfigError::Invalid(
                "downloads.max_attempts must be greater than 0".into(),
            ));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LAPAK_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("LAPAK_DATABASE_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid LAPAK_DATABASE_MAX_CONNECTIONS"),
            }
        }

        if let Ok(url) = std::env::var("LAPAK_DOWNLOAD_BASE_URL") {
            self.downloads.base_url = url;
        }

        if let Ok(secret) = std::env::var("LAPAK_LINK_SIGNING_SECRET") {
            debug!("Overriding link signing secret from environment");
            self.downloads.signing_secret = secret;
        }

        if let Ok(ttl) = std::env::var("LAPAK_LINK_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.downloads.link_ttl_secs = ttl;
            }
        }

        if let Ok(max) = std::env::var("LAPAK_DOWNLOAD_MAX_ATTEMPTS") {
            if let Ok(max) = max.parse::<i64>() {
                self.downloads.max_attempts = max;
            }
        }

        if let Ok(timeout) = std::env::var("LAPAK_GATEWAY_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                debug!(timeout_secs = timeout, "Overriding gateway timeout from environment");
                self.gateway.timeout_secs = timeout;
            }
        }
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database pool configuration for this checkout.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.downloads.link_ttl_secs)
    }

    pub fn attempt_window(&self) -> Duration {
        Duration::from_secs(self.downloads.attempt_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config = CheckoutConfig::default();
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.downloads.link_ttl_secs, 3600);
        assert_eq!(config.downloads.max_attempts, 5);
        assert_eq!(config.gateway.timeout_secs, 10);
    }

    #[test]
    fn test_default_secret_is_rejected() {
        let config = CheckoutConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_toml_parsing_with_partial_sections() {
        let config = CheckoutConfig::from_toml(&format!(
            r#"
            [downloads]
            base_url = "https://dl.lapak.id/d"
            signing_secret = "{}"
            max_attempts = 3

            [gateway]
            timeout_secs = 4
            "#,
            SECRET
        ))
        .unwrap();

        assert_eq!(config.downloads.max_attempts, 3);
        assert_eq!(config.downloads.link_ttl_secs, 3600);
        assert_eq!(config.gateway_timeout(), Duration::from_secs(4));
        assert_eq!(config.database.path, PathBuf::from("./lapak.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = CheckoutConfig::default();
        config.downloads.signing_secret = SECRET.to_string();
        assert!(config.validate().is_ok());

        config.downloads.base_url = "ftp://files".to_string();
        assert!(config.validate().is_err());

        config.downloads.base_url = "https://dl.lapak.id".to_string();
        config.gateway.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = CheckoutConfig::from_toml("[gateway\ntimeout_secs = ");
        assert!(matches!(result, Err(ConfigError::LoadFailed(_))));
    }
}
