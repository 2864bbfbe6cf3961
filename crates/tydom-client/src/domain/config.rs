//! TOML-based client configuration.
//!
//! Example file:
//!
//! ```toml
//! [gateway]
//! host = "192.168.1.20"
//! port = 443
//! serial = "001A25ABCDEF"
//! password = "secret"
//!
//! [timing]
//! reconnect_cooldown_secs = 20
//!
//! [client]
//! log_level = "debug"
//! ```
//!
//! # Serde default values
//!
//! Every field except the gateway host and serial has a default, so a file
//! only needs to name what differs from the reference behaviour.  Missing
//! sections are filled in entirely.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The gateway host is empty.
    #[error("gateway host must be specified")]
    MissingHost,

    /// The gateway port is zero.
    #[error("gateway port must be specified")]
    MissingPort,

    /// The gateway serial (MAC suffix) is empty.
    #[error("gateway serial must be specified")]
    MissingSerial,

    /// A timing value that must be positive is zero.
    #[error("timing value `{0}` must be greater than zero")]
    ZeroTiming(&'static str),

    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub client: ClientSettings,
}

/// Where the gateway lives and how to log in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Hostname or IP address of the gateway on the LAN.
    #[serde(default)]
    pub host: String,
    /// TLS port of the mediation endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Last six bytes of the gateway MAC address, used as the digest login.
    #[serde(default)]
    pub serial: String,
    /// Gateway password.  Absent when authentication is disabled on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Timeouts, cooldowns and polling periods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Number of `request_interval_ms` periods a caller waits for a result.
    #[serde(default = "default_request_attempts")]
    pub request_attempts: u32,
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    /// Wait between a connection failure and the next attempt.
    #[serde(default = "default_reconnect_cooldown_secs")]
    pub reconnect_cooldown_secs: u64,
    /// Granularity at which the cooldown checks for shutdown.
    #[serde(default = "default_cooldown_step_ms")]
    pub cooldown_step_ms: u64,
    /// How often the supervisor inspects connection health.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    /// WebSocket-level ping period.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Age after which a never-awaited pending request is discarded.
    #[serde(default = "default_result_expiry_secs")]
    pub result_expiry_secs: u64,
    /// Upper bound for `start(Blocking)` to reach Ready.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Client identity and local behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// `User-Agent` header placed on every request frame.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Capacity of the subscription dispatch queue.
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    443
}
fn default_request_attempts() -> u32 {
    50
}
fn default_request_interval_ms() -> u64 {
    50
}
fn default_reconnect_cooldown_secs() -> u64 {
    20
}
fn default_cooldown_step_ms() -> u64 {
    1000
}
fn default_health_interval_ms() -> u64 {
    2000
}
fn default_keepalive_interval_secs() -> u64 {
    10
}
fn default_result_expiry_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "TydomClient/0.1".to_string()
}
fn default_dispatch_queue() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            serial: String::new(),
            password: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_attempts: default_request_attempts(),
            request_interval_ms: default_request_interval_ms(),
            reconnect_cooldown_secs: default_reconnect_cooldown_secs(),
            cooldown_step_ms: default_cooldown_step_ms(),
            health_interval_ms: default_health_interval_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            result_expiry_secs: default_result_expiry_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            dispatch_queue: default_dispatch_queue(),
            log_level: default_log_level(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

impl ClientConfig {
    /// Creates a config for `host:port` with every other value defaulted.
    pub fn new(host: impl Into<String>, port: u16, serial: impl Into<String>) -> Self {
        Self {
            gateway: GatewayConfig {
                host: host.into(),
                port,
                serial: serial.into(),
                password: None,
            },
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML.  The result is not
    /// validated; call [`ClientConfig::validate`] before use.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the fields the client cannot run without.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.gateway.port == 0 {
            return Err(ConfigError::MissingPort);
        }
        if self.gateway.serial.trim().is_empty() {
            return Err(ConfigError::MissingSerial);
        }
        if self.timing.request_attempts == 0 || self.timing.request_interval_ms == 0 {
            return Err(ConfigError::ZeroTiming("request budget"));
        }
        if self.timing.reconnect_cooldown_secs == 0 {
            return Err(ConfigError::ZeroTiming("reconnect_cooldown_secs"));
        }
        if self.timing.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTiming("connect_timeout_secs"));
        }
        if self.timing.cooldown_step_ms == 0 {
            return Err(ConfigError::ZeroTiming("cooldown_step_ms"));
        }
        if self.timing.health_interval_ms == 0 {
            return Err(ConfigError::ZeroTiming("health_interval_ms"));
        }
        if self.client.dispatch_queue == 0 {
            return Err(ConfigError::ZeroTiming("dispatch_queue"));
        }
        Ok(())
    }

    // ── Derived durations ─────────────────────────────────────────────────────

    /// Upper bound a caller waits for a response: attempts × interval.
    pub fn request_budget(&self) -> Duration {
        Duration::from_millis(self.timing.request_interval_ms)
            .saturating_mul(self.timing.request_attempts)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.timing.reconnect_cooldown_secs)
    }

    pub fn cooldown_step(&self) -> Duration {
        Duration::from_millis(self.timing.cooldown_step_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.timing.health_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.timing.keepalive_interval_secs)
    }

    pub fn result_expiry(&self) -> Duration {
        Duration::from_secs(self.timing.result_expiry_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.connect_timeout_secs)
    }
}
