//! # magicsocket-settings
//!
//! Configuration with layered sources, in priority order:
//! 1. **Compiled defaults**: [`MagicSocketSettings::default()`]
//! 2. **Settings file**: `~/.magicsocket/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `MAGICSOCKET_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;
