//! Settings types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MagicSocketSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Connection hook behavior.
    pub hooks: HookSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// HTTP path that accepts WebSocket upgrades.
    pub path: String,
    /// Upgrades are refused with 503 once this many connections are live.
    pub max_connections: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/".to_string(),
            max_connections: 10_000,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// What happens to a connection when one of its hooks fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFailurePolicy {
    /// Log the failure and carry on.
    #[default]
    LogOnly,
    /// Log the failure and tear the connection down.
    Disconnect,
}

impl fmt::Display for HookFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogOnly => f.write_str("log_only"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

impl FromStr for HookFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "log_only" | "log" => Ok(Self::LogOnly),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown hook failure policy '{other}'")),
        }
    }
}

/// Connection hook behavior.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSettings {
    /// Reaction to a failing `on_incoming` / `on_outgoing` / `on_ping` hook.
    pub failure_policy: HookFailurePolicy,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
