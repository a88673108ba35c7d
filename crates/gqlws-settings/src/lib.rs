//! # gqlws-settings
//!
//! Layered configuration for the gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.gqlws/settings.json` or an explicit path
//! 3. **Environment variables**: `GQLWS_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::{GatewaySettings, LoggingSettings, ServerSettings, WebSocketSettings};
