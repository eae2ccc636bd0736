//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MagicSocketSettings::default()`]
//! 2. If `~/.magicsocket/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MAGICSOCKET_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{HookFailurePolicy, MagicSocketSettings};

/// Resolve the path to the settings file (`~/.magicsocket/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".magicsocket").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MagicSocketSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MagicSocketSettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

fn load_with_lookup(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<MagicSocketSettings> {
    let defaults = serde_json::to_value(MagicSocketSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MagicSocketSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `MAGICSOCKET_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut MagicSocketSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides resolved through `lookup` (an env var reader in production).
///
/// Values that fail to parse are logged and ignored, leaving the file or
/// default value in place.
pub fn apply_overrides(settings: &mut MagicSocketSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("MAGICSOCKET_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("MAGICSOCKET_PORT") {
        match parse_u16_range(&v, 0, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => ignored("MAGICSOCKET_PORT", &v),
        }
    }
    if let Some(v) = read("MAGICSOCKET_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = read("MAGICSOCKET_MAX_CONNECTIONS") {
        match parse_usize_range(&v, 1, usize::MAX) {
            Some(n) => settings.server.max_connections = n,
            None => ignored("MAGICSOCKET_MAX_CONNECTIONS", &v),
        }
    }
    if let Some(v) = read("MAGICSOCKET_MAX_MESSAGE_SIZE") {
        match parse_usize_range(&v, 1024, 1 << 30) {
            Some(n) => settings.server.max_message_size = n,
            None => ignored("MAGICSOCKET_MAX_MESSAGE_SIZE", &v),
        }
    }

    // ── Hooks ───────────────────────────────────────────────────────
    if let Some(v) = read("MAGICSOCKET_HOOK_FAILURE_POLICY") {
        match v.parse::<HookFailurePolicy>() {
            Ok(policy) => settings.hooks.failure_policy = policy,
            Err(_) => ignored("MAGICSOCKET_HOOK_FAILURE_POLICY", &v),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("MAGICSOCKET_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("MAGICSOCKET_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => ignored("MAGICSOCKET_LOG_JSON", &v),
        }
    }
}

fn ignored(name: &str, value: &str) {
    warn!(name, value, "ignoring invalid settings override");
}

/// Check constraints the types can't express.
pub fn validate(settings: &MagicSocketSettings) -> Result<()> {
    let server = &settings.server;
    if !server.path.starts_with('/') {
        return Err(SettingsError::invalid(
            "server.path",
            format!("must start with '/', got '{}'", server.path),
        ));
    }
    if server.max_connections == 0 {
        return Err(SettingsError::invalid("server.maxConnections", "must be at least 1"));
    }
    if server.max_message_size == 0 {
        return Err(SettingsError::invalid("server.maxMessageSize", "must be at least 1"));
    }
    Ok(())
}

/// Parse a boolean from common string representations.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `[min, max]`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `[min, max]`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
