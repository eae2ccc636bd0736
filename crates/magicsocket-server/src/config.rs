//! Server configuration.

use magicsocket_settings::{HookFailurePolicy, MagicSocketSettings};
use serde::{Deserialize, Serialize};

/// Configuration for [`MagicSocketServer`](crate::server::MagicSocketServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// HTTP path accepting WebSocket upgrades (default `"/"`).
    pub path: String,
    /// Upgrades are refused with 503 at this many live connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// What a failing hook does to its connection.
    pub hook_failure_policy: HookFailurePolicy,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/".into(),
            max_connections: 10_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            hook_failure_policy: HookFailurePolicy::LogOnly,
        }
    }
}

impl From<&MagicSocketSettings> for ServerConfig {
    fn from(settings: &MagicSocketSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            path: settings.server.path.clone(),
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            hook_failure_policy: settings.hooks.failure_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.path, "/");
        assert_eq!(cfg.hook_failure_policy, HookFailurePolicy::LogOnly);
    }

    #[test]
    fn from_settings() {
        let mut settings = MagicSocketSettings::default();
        settings.server.port = 9100;
        settings.server.path = "/ws".into();
        settings.server.max_connections = 3;
        settings.hooks.failure_policy = HookFailurePolicy::Disconnect;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9100");
        assert_eq!(cfg.path, "/ws");
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.max_message_size, settings.server.max_message_size);
        assert_eq!(cfg.hook_failure_policy, HookFailurePolicy::Disconnect);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bind_addr(), cfg.bind_addr());
        assert_eq!(back.max_message_size, cfg.max_message_size);
    }
}
