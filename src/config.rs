//! # Configuration Management
//!
//! Centralized configuration for the session engine.
//!
//! This module provides structured configuration for the accept loop, the
//! per-session pipeline (compression threshold, buffering, encryption) and
//! logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Operational Notes
//! - The default compression threshold (256 bytes) matches what clients expect
//! - `max_packet_size` bounds both declared frame lengths and decompressed sizes
//! - Keepalive timing is enforced by the connection driver, not the stream layers

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol revision spoken by this engine
pub const PROTOCOL_VERSION: i32 = 340;

/// Human readable name of the protocol revision
pub const VERSION_NAME: &str = "1.12.2";

/// Max allowed frame body size (largest value a 3-byte varint can carry)
pub const MAX_PACKET_SIZE: usize = 2_097_151;

/// Default compression threshold in bytes
pub const DEFAULT_COMPRESSION_THRESHOLD: u32 = 256;

/// Capacity step used when a write buffer grows
pub const DEFAULT_BUFFER_STEP: usize = 4096;

/// Largest chunk handed to the socket in a single write
pub const DEFAULT_FRAME_SIZE: usize = 8192;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Accept loop and player limits
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-session pipeline settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CRAFT_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("CRAFT_MAX_PLAYERS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_players = val;
            }
        }

        // A negative threshold disables compression, as in server.properties
        if let Ok(threshold) = std::env::var("CRAFT_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i64>() {
                config.session.compression_threshold = u32::try_from(val).ok();
            }
        }

        if let Ok(timeout) = std::env::var("CRAFT_KEEPALIVE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.keepalive_timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.session.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Accept loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:25565")
    pub address: String,

    /// Message of the day shown in the server list
    pub motd: String,

    /// Players allowed in the registry at once
    pub max_players: usize,

    /// Capacity of each player's outbound mailbox
    pub backpressure_limit: usize,

    /// Maximum number of concurrent connections (any phase)
    pub max_connections: usize,

    /// Interval between keepalive requests in Play
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// Silence after which a Play session is dropped
    #[serde(with = "duration_serde")]
    pub keepalive_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:25565"),
            motd: String::from("A craft-protocol server"),
            max_players: 20,
            backpressure_limit: 128,
            max_connections: 1000,
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:25565')",
                self.address
            ));
        }

        if self.motd.chars().count() > 256 {
            errors.push("MOTD too long (maximum: 256 characters)".to_string());
        }

        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        } else if self.max_players > self.max_connections {
            errors.push(format!(
                "Max players ({}) cannot exceed max connections ({})",
                self.max_players, self.max_connections
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.keepalive_interval.as_millis() < 100 {
            errors.push("Keepalive interval too short (minimum: 100ms)".to_string());
        }

        if self.keepalive_timeout <= self.keepalive_interval {
            errors.push("Keepalive timeout must be longer than the keepalive interval".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Per-session pipeline configuration
///
/// Missing keys fall back to [`SessionConfig::default`]. Compression can only
/// be switched off through the environment or in code.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Body size at which frames are compressed; `None` leaves compression off
    pub compression_threshold: Option<u32>,

    /// Zlib level used when compressing (0-9)
    pub compression_level: u32,

    /// Capacity step for the outbound buffer
    pub buffer_step: usize,

    /// Largest chunk written to the socket per call
    pub frame_size: usize,

    /// Maximum accepted frame body and decompressed size
    pub max_packet_size: usize,

    /// Run the encryption exchange during login
    pub online_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            compression_threshold: Some(DEFAULT_COMPRESSION_THRESHOLD),
            compression_level: 6,
            buffer_step: DEFAULT_BUFFER_STEP,
            frame_size: DEFAULT_FRAME_SIZE,
            max_packet_size: MAX_PACKET_SIZE,
            online_mode: false,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.compression_level > 9 {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 0-9)",
                self.compression_level
            ));
        }

        if let Some(threshold) = self.compression_threshold {
            if threshold as usize > self.max_packet_size {
                errors.push(
                    "Compression threshold cannot be larger than max packet size".to_string(),
                );
            }
        }

        if self.buffer_step == 0 {
            errors.push("Buffer step must be greater than 0".to_string());
        }

        if self.frame_size == 0 {
            errors.push("Frame size must be greater than 0".to_string());
        }

        if self.max_packet_size == 0 {
            errors.push("Max packet size cannot be 0".to_string());
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} bytes (protocol maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Include the module path of each event
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("craft-protocol"),
            log_level: Level::INFO,
            json_format: false,
            show_target: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
