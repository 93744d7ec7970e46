//! Server configuration module
//!
//! Handles loading and parsing of relay configuration from files and environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name shown in logs and the stats endpoint
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Interface to bind listeners on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// WebSocket port for browser clients
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    /// Management API port
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Whether the management API is started
    #[serde(default = "default_true")]
    pub management_enabled: bool,

    /// Outbound frames buffered per connection before delivery is skipped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Largest accepted inbound WebSocket message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Enable trace logging
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_server_name() -> String {
    "Mirromaus".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_websocket_port() -> u16 {
    8080
}

fn default_management_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_message_size() -> usize {
    16 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            websocket_port: default_websocket_port(),
            management_port: default_management_port(),
            management_enabled: default_true(),
            outbound_buffer: default_outbound_buffer(),
            max_message_size: default_max_message_size(),
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("MIRROMAUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        config.config_path = config_path;

        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MIRROMAUS_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("MIRROMAUS_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("MIRROMAUS_WEBSOCKET_PORT") {
            if let Ok(port) = val.parse() {
                self.websocket_port = port;
            }
        }
        if let Ok(val) = env::var("MIRROMAUS_MANAGEMENT_PORT") {
            if let Ok(port) = val.parse() {
                self.management_port = port;
            }
        }
        if let Ok(val) = env::var("MIRROMAUS_MANAGEMENT_ENABLED") {
            self.management_enabled = parse_flag(&val);
        }
        if let Ok(val) = env::var("MIRROMAUS_OUTBOUND_BUFFER") {
            if let Ok(size) = val.parse() {
                self.outbound_buffer = size;
            }
        }
        if let Ok(val) = env::var("MIRROMAUS_MAX_MESSAGE_SIZE") {
            if let Ok(size) = val.parse() {
                self.max_message_size = size;
            }
        }
        if let Ok(val) = env::var("MIRROMAUS_DEBUG") {
            self.debug = parse_flag(&val);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.management_enabled && self.websocket_port == self.management_port {
            anyhow::bail!("Management port must be different from the WebSocket port");
        }

        if self.outbound_buffer == 0 || self.outbound_buffer > 4096 {
            anyhow::bail!("Outbound buffer must be between 1 and 4096 frames");
        }

        if self.max_message_size < 256 || self.max_message_size > 1024 * 1024 {
            anyhow::bail!("Max message size must be between 256 bytes and 1 MiB");
        }

        Ok(())
    }

    /// Socket address string for the WebSocket listener
    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.websocket_port)
    }

    /// Socket address string for the management API
    pub fn management_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.management_port)
    }
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Mirromaus");
        assert_eq!(config.websocket_port, 8080);
        assert_eq!(config.management_port, 8081);
        assert_eq!(config.outbound_buffer, 64);
        assert!(config.management_enabled);
        assert_eq!(config.websocket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            websocket_port = 9000
            debug = true
            "#,
        )
        .unwrap();

        assert_eq!(config.websocket_port, 9000);
        assert!(config.debug);
        assert_eq!(config.management_port, 8081);
        assert_eq!(config.max_message_size, 16 * 1024);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        assert!(config.validate().is_ok());

        // Duplicate ports
        config.management_port = config.websocket_port;
        assert!(config.validate().is_err());

        // Allowed once the management API is off
        config.management_enabled = false;
        assert!(config.validate().is_ok());

        config.outbound_buffer = 0;
        assert!(config.validate().is_err());
        config.outbound_buffer = 64;

        config.max_message_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
    }
}
