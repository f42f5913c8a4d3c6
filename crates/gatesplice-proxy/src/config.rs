// ============================================
// File: crates/gatesplice-proxy/src/config.rs
// ============================================
//! # Proxy Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the Gatesplice proxy,
//! supporting TOML files and environment variables.
//!
//! ## Configuration Sections
//! - `network`: listen address and the real game server to dial
//! - `protocol`: protocol table file
//! - `framing`: frame size ceiling
//! - `dispatch`: version-announcement constants, warning toggles
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "127.0.0.1:9042"
//! server_addr = "208.67.49.92:10001"
//!
//! [protocol]
//! tables_path = "protocol.json"
//!
//! [framing]
//! max_frame_len = 65535
//!
//! [dispatch]
//! check_version_opcode = 19900
//! check_version_name = "C_CHECK_VERSION"
//! warn_implied_version = true
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require proxy restart
//! - `NO_WARN_IMPLIED_VERSION` in the environment overrides the
//!   `dispatch.warn_implied_version` toggle
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use gatesplice_core::framing::{DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_SIZE};

use crate::dispatch::DispatchSettings;
use crate::error::{ProxyError, Result};

// ============================================
// ProxyConfig
// ============================================

/// Main proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Protocol table configuration.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Frame handling limits.
    #[serde(default)]
    pub framing: FramingConfig,

    /// Dispatcher tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ProxyError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ProxyError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.framing.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }

    /// Builds the dispatcher settings, applying environment overrides.
    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            check_version_opcode: self.dispatch.check_version_opcode,
            check_version_name: self.dispatch.check_version_name.clone(),
            warn_implied_version: self.dispatch.warn_implied_version,
        }
        .with_env_overrides()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            protocol: ProtocolConfig::default(),
            framing: FramingConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the proxy listens on for game clients.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// The real game server the proxy dials per connection.
    #[serde(default = "default_server_addr")]
    pub server_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9042".parse().unwrap()
}

fn default_server_addr() -> SocketAddr {
    "127.0.0.1:10001".parse().unwrap()
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(ProxyError::config_invalid(
                "network.listen_addr",
                "port cannot be 0",
            ));
        }
        if self.server_addr.port() == 0 {
            return Err(ProxyError::config_invalid(
                "network.server_addr",
                "port cannot be 0",
            ));
        }
        if self.listen_addr == self.server_addr {
            return Err(ProxyError::config_invalid(
                "network.server_addr",
                "proxy cannot dial itself",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
        }
    }
}

// ============================================
// ProtocolConfig
// ============================================

/// Protocol table configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Path to the JSON protocol description.
    #[serde(default = "default_tables_path")]
    pub tables_path: String,
}

fn default_tables_path() -> String {
    "protocol.json".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tables_path: default_tables_path(),
        }
    }
}

// ============================================
// FramingConfig
// ============================================

/// Frame handling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Ceiling on a single frame; lengths above it are fatal framing
    /// errors.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl FramingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_frame_len < FRAME_HEADER_SIZE {
            return Err(ProxyError::config_invalid(
                "framing.max_frame_len",
                format!("must be at least {FRAME_HEADER_SIZE}"),
            ));
        }
        if self.max_frame_len > DEFAULT_MAX_FRAME_LEN {
            return Err(ProxyError::config_invalid(
                "framing.max_frame_len",
                "cannot exceed the 16-bit length field",
            ));
        }
        Ok(())
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
        }
    }
}

// ============================================
// DispatchConfig
// ============================================

/// Dispatcher tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Opcode of the in-band version announcement under the earliest
    /// tables. Versioned constant; changes with major game revisions.
    #[serde(default = "default_check_version_opcode")]
    pub check_version_opcode: u16,

    /// Message name of the version announcement.
    #[serde(default = "default_check_version_name")]
    pub check_version_name: String,

    /// Warn when a hook leaves its definition version implied.
    #[serde(default = "default_warn_implied_version")]
    pub warn_implied_version: bool,
}

fn default_check_version_opcode() -> u16 {
    19900
}

fn default_check_version_name() -> String {
    "C_CHECK_VERSION".to_string()
}

fn default_warn_implied_version() -> bool {
    true
}

impl DispatchConfig {
    fn validate(&self) -> Result<()> {
        if self.check_version_name.is_empty() {
            return Err(ProxyError::config_invalid(
                "dispatch.check_version_name",
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            check_version_opcode: default_check_version_opcode(),
            check_version_name: default_check_version_name(),
            warn_implied_version: default_warn_implied_version(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.check_version_opcode, 19900);
        assert_eq!(config.framing.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            listen_addr = "127.0.0.1:9042"
            server_addr = "10.0.0.5:10001"

            [protocol]
            tables_path = "tables/na-361000.json"

            [framing]
            max_frame_len = 32768

            [dispatch]
            check_version_opcode = 19900
            check_version_name = "C_CHECK_VERSION"
            warn_implied_version = false

            [logging]
            level = "debug"
        "#;

        let config = ProxyConfig::from_str(toml).unwrap();
        assert_eq!(config.network.listen_addr.port(), 9042);
        assert_eq!(config.network.server_addr.port(), 10001);
        assert_eq!(config.protocol.tables_path, "tables/na-361000.json");
        assert_eq!(config.framing.max_frame_len, 32768);
        assert!(!config.dispatch.warn_implied_version);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
            [network]
            server_addr = "10.0.0.5:10001"
        "#;

        let config = ProxyConfig::from_str(toml).unwrap();
        assert_eq!(config.network.listen_addr, default_listen_addr());
        assert_eq!(config.dispatch.check_version_name, "C_CHECK_VERSION");
    }

    #[test]
    fn test_rejects_zero_port() {
        let toml = r#"
            [network]
            listen_addr = "127.0.0.1:0"
        "#;
        assert!(matches!(
            ProxyConfig::from_str(toml),
            Err(ProxyError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_rejects_self_dial() {
        let toml = r#"
            [network]
            listen_addr = "127.0.0.1:9042"
            server_addr = "127.0.0.1:9042"
        "#;
        assert!(ProxyConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_rejects_tiny_frame_limit() {
        let toml = r#"
            [framing]
            max_frame_len = 3
        "#;
        assert!(ProxyConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_dispatch_settings_reflect_config() {
        let toml = r#"
            [dispatch]
            check_version_opcode = 20012
            check_version_name = "C_HELLO_VERSION"
        "#;
        let config = ProxyConfig::from_str(toml).unwrap();
        let settings = config.dispatch_settings();
        assert_eq!(settings.check_version_opcode, 20012);
        assert_eq!(settings.check_version_name, "C_HELLO_VERSION");
    }
}
