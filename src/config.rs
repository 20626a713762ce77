//! # Configuration Management
//!
//! File and environment driven settings for gates, clients and UDP endpoints.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or strings via `from_toml()`
//! - Environment overrides via `from_env()` (`LEAFNET_*`)
//! - Direct instantiation with defaults
//!
//! Zero limits are tolerated at runtime (servers and clients fall back to
//! their defaults and log it), but `validate()` reports them so a bad file
//! is caught before start.

use crate::error::{ProtocolError, Result};
use crate::transport::udp::{
    AsyncClientOptions, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_TRY, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE,
};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-side gate
    #[serde(default)]
    pub gate: GateConfig,

    /// Client-side gate
    #[serde(default)]
    pub client: ClientConfig,

    /// UDP endpoints
    #[serde(default)]
    pub udp: UdpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
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

    /// Defaults overridden by `LEAFNET_*` environment variables.
    ///
    /// Unparseable numeric values are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LEAFNET_TCP_ADDR") {
            config.gate.tcp_addr = addr;
        }
        if let Ok(addr) = std::env::var("LEAFNET_WS_ADDR") {
            config.gate.ws_addr = addr;
        }
        if let Some(val) = env_parse::<usize>("LEAFNET_MAX_CONN_NUM") {
            config.gate.max_conn_num = val;
        }
        if let Some(val) = env_parse::<usize>("LEAFNET_PENDING_WRITE_NUM") {
            config.gate.pending_write_num = val;
            config.client.pending_write_num = val;
        }
        if let Some(val) = env_parse::<u32>("LEAFNET_MAX_MSG_LEN") {
            config.gate.max_msg_len = val;
            config.client.max_msg_len = val;
        }
        if let Some(val) = env_parse::<u64>("LEAFNET_HTTP_TIMEOUT_MS") {
            config.gate.http_timeout = Duration::from_millis(val);
            config.client.http_timeout = Duration::from_millis(val);
        }
        if let Ok(path) = std::env::var("LEAFNET_CERT_FILE") {
            config.gate.cert_file = path;
        }
        if let Ok(path) = std::env::var("LEAFNET_KEY_FILE") {
            config.gate.key_file = path;
        }

        if let Ok(addr) = std::env::var("LEAFNET_CLIENT_ADDR") {
            config.client.addr = addr;
        }
        if let Some(val) = env_parse::<u64>("LEAFNET_CONNECT_INTERVAL_MS") {
            config.client.connect_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<bool>("LEAFNET_AUTO_RECONNECT") {
            config.client.auto_reconnect = val;
        }

        if let Ok(addr) = std::env::var("LEAFNET_UDP_ADDR") {
            config.udp.addr = addr;
        }
        if let Some(val) = env_parse::<usize>("LEAFNET_UDP_MAX_TRY") {
            config.udp.max_try = val;
        }

        if let Ok(level) = std::env::var("LEAFNET_LOG_LEVEL") {
            config.logging.log_level = level
                .parse()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
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
        errors.extend(self.gate.validate());
        errors.extend(self.client.validate());
        errors.extend(self.udp.validate());
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

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn check_addr(errors: &mut Vec<String>, what: &str, addr: &str) {
    if addr.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {what} address format: '{addr}' (expected format: '0.0.0.0:3563')"
        ));
    }
}

fn check_framing(errors: &mut Vec<String>, len_msg_len: usize, max_msg_len: u32) {
    match len_msg_len {
        1 if max_msg_len > u8::MAX as u32 => errors.push(format!(
            "max_msg_len {max_msg_len} does not fit a 1-byte length prefix (max: 255)"
        )),
        2 if max_msg_len > u16::MAX as u32 => errors.push(format!(
            "max_msg_len {max_msg_len} does not fit a 2-byte length prefix (max: 65535)"
        )),
        1 | 2 | 4 => {}
        other => errors.push(format!("Invalid len_msg_len: {other} (valid: 1, 2 or 4)")),
    }
}

/// Server-side gate configuration. An empty address disables that transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// TCP listen address (e.g., "0.0.0.0:3563")
    pub tcp_addr: String,

    /// WebSocket listen address
    pub ws_addr: String,

    /// Admission limit per transport
    pub max_conn_num: usize,

    /// Write queue capacity per connection
    pub pending_write_num: usize,

    /// Largest message on either transport
    pub max_msg_len: u32,

    /// TCP length prefix width in bytes
    pub len_msg_len: usize,

    /// TCP length prefix and message ID byte order
    pub little_endian: bool,

    /// Deadline for the TLS and WebSocket handshakes
    #[serde(with = "duration_serde")]
    pub http_timeout: Duration,

    /// PEM certificate chain enabling WSS, paired with `key_file`
    pub cert_file: String,

    pub key_file: String,

    /// Send WebSocket text messages instead of binary ones
    pub text_format: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tcp_addr: String::from("127.0.0.1:3563"),
            ws_addr: String::new(),
            max_conn_num: 100,
            pending_write_num: 100,
            max_msg_len: 4096,
            len_msg_len: 2,
            little_endian: false,
            http_timeout: timeout::DEFAULT_HTTP_TIMEOUT,
            cert_file: String::new(),
            key_file: String::new(),
            text_format: false,
        }
    }
}

impl GateConfig {
    /// Validate gate configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tcp_addr.is_empty() && self.ws_addr.is_empty() {
            errors.push("Gate needs at least one of tcp_addr or ws_addr".to_string());
        }
        if !self.tcp_addr.is_empty() {
            check_addr(&mut errors, "gate tcp", &self.tcp_addr);
        }
        if !self.ws_addr.is_empty() {
            check_addr(&mut errors, "gate ws", &self.ws_addr);
        }

        if self.max_conn_num == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_conn_num > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_conn_num
            ));
        }

        if self.pending_write_num == 0 {
            errors.push("Pending write number must be greater than 0".to_string());
        } else if self.pending_write_num > 1_000_000 {
            errors.push(format!(
                "Pending write number too large: {} (max recommended: 1,000,000)",
                self.pending_write_num
            ));
        }

        if self.max_msg_len == 0 {
            errors.push("Max message length must be greater than 0".to_string());
        }
        if !self.tcp_addr.is_empty() {
            check_framing(&mut errors, self.len_msg_len, self.max_msg_len);
        }

        if self.http_timeout.as_millis() < 100 {
            errors.push("HTTP timeout too short (minimum: 100ms)".to_string());
        } else if self.http_timeout.as_secs() > 300 {
            errors.push("HTTP timeout too long (maximum: 300s)".to_string());
        }

        if self.cert_file.is_empty() != self.key_file.is_empty() {
            errors.push("cert_file and key_file must be set together".to_string());
        }

        errors
    }
}

/// Client-side gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, or a `ws://` URL for WebSocket
    pub addr: String,

    /// Independent connections to keep
    pub conn_num: usize,

    /// Pause between dial attempts
    #[serde(with = "duration_serde")]
    pub connect_interval: Duration,

    /// Redial after a connection ends
    pub auto_reconnect: bool,

    pub pending_write_num: usize,

    pub max_msg_len: u32,

    pub len_msg_len: usize,

    pub little_endian: bool,

    /// WebSocket handshake deadline
    #[serde(with = "duration_serde")]
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: String::from("127.0.0.1:3563"),
            conn_num: 1,
            connect_interval: timeout::DEFAULT_CONNECT_INTERVAL,
            auto_reconnect: false,
            pending_write_num: 100,
            max_msg_len: 4096,
            len_msg_len: 2,
            little_endian: false,
            http_timeout: timeout::DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let is_ws = self.addr.starts_with("ws://");
        if self.addr.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if !is_ws {
            check_addr(&mut errors, "client", &self.addr);
        }

        if self.conn_num == 0 {
            errors.push("Connection number must be greater than 0".to_string());
        }

        if self.connect_interval.as_millis() < 10 {
            errors.push("Connect interval too short (minimum: 10ms)".to_string());
        } else if self.connect_interval.as_secs() > 300 {
            errors.push("Connect interval too long (maximum: 300s)".to_string());
        }

        if self.pending_write_num == 0 {
            errors.push("Pending write number must be greater than 0".to_string());
        }

        if self.max_msg_len == 0 {
            errors.push("Max message length must be greater than 0".to_string());
        }
        if !is_ws {
            check_framing(&mut errors, self.len_msg_len, self.max_msg_len);
        }

        errors
    }
}

/// UDP endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Server bind address or client peer address
    pub addr: String,

    /// Read and write queue capacity
    pub buffer_size: usize,

    /// Send attempts per datagram
    pub max_try: usize,

    /// Receive buffer per datagram
    pub packet_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            addr: String::from("127.0.0.1:3564"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_try: DEFAULT_MAX_TRY,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl UdpConfig {
    /// Options for [`UdpAsyncClient`](crate::transport::udp::UdpAsyncClient)
    pub fn client_options(&self) -> AsyncClientOptions {
        AsyncClientOptions {
            buffer_size: self.buffer_size,
            max_try: self.max_try,
            packet_size: self.packet_size,
        }
    }

    /// Validate UDP configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.addr.is_empty() {
            errors.push("UDP address cannot be empty".to_string());
        } else {
            check_addr(&mut errors, "udp", &self.addr);
        }

        if self.buffer_size == 0 {
            errors.push("UDP buffer size must be greater than 0".to_string());
        }

        if self.max_try == 0 {
            errors.push("UDP max_try must be greater than 0".to_string());
        }

        if self.packet_size == 0 || self.packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Invalid UDP packet size: {} (valid range: 1-{MAX_PACKET_SIZE})",
                self.packet_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG` when set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Include the event target (module path)
    pub with_target: bool,

    pub with_thread_ids: bool,

    /// Whether to use JSON formatting for logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            with_target: true,
            with_thread_ids: false,
            json: false,
        }
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
        level.as_str().to_lowercase().serialize(serializer)
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
