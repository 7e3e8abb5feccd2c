//! Configuration management for the chat relay server
//!
//! Values come from built-in defaults, then an optional `config.toml`, then
//! `CHAT_RELAY_*` environment variables (highest precedence).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::relay::SelfDelivery;

/// Environment variable prefix, e.g. `CHAT_RELAY_PORT=4000`
pub const ENV_PREFIX: &str = "CHAT_RELAY";

/// Default configuration file name (extension resolved by the `config` crate)
const CONFIG_FILE: &str = "config";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IP address the listener binds to
    pub bind_address: String,

    /// Listen port; 0 asks the OS for an ephemeral port
    pub port: u16,

    // ═══ LIMITS ═══
    /// Maximum number of registered connections
    pub max_clients: usize,

    /// Maximum inbound line length in bytes, excluding the terminator
    pub max_line_length: usize,

    /// Capacity of each connection's outbound message queue
    pub outbound_queue_capacity: usize,

    // ═══ TIMEOUTS ═══
    /// How long a broadcast waits for room in one recipient's queue
    pub delivery_timeout_ms: u64,

    /// How long a single socket write to a recipient may take
    pub write_timeout_ms: u64,

    /// How long shutdown waits for connection supervisors to finish
    pub shutdown_grace_ms: u64,

    // ═══ BEHAVIOUR ═══
    /// Whether senders receive their own messages
    pub self_delivery: SelfDelivery,

    /// Broadcast join/leave announcements under the server identity
    pub announce_presence: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12345,
            max_clients: 100,
            max_line_length: 4096,
            outbound_queue_capacity: 1024,
            delivery_timeout_ms: 2000,
            write_timeout_ms: 10_000,
            shutdown_grace_ms: 5000,
            self_delivery: SelfDelivery::Echo,
            announce_presence: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `./config.toml` (if present) with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::build(File::with_name(CONFIG_FILE).required(false))
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "bind_address cannot be empty".into(),
            ));
        }

        let limits = [
            ("max_clients", self.max_clients),
            ("max_line_length", self.max_line_length),
            ("outbound_queue_capacity", self.outbound_queue_capacity),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(must_be_positive(key));
            }
        }

        let timeouts = [
            ("delivery_timeout_ms", self.delivery_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(must_be_positive(key));
            }
        }

        Ok(())
    }

    /// Bind address and port as a socket address string
    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn must_be_positive(key: &str) -> config::ConfigError {
    config::ConfigError::Message(format!("{key} must be greater than 0"))
}
