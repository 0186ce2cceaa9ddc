//! # feedcast-settings
//!
//! Layered configuration for the relay and the ingestion server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FeedcastSettings::default()`]
//! 2. **Settings file**: `~/.feedcast/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `FEEDCAST_*` overrides (highest priority)
//!
//! The binary applies its CLI flags on top of the result and then calls
//! [`FeedcastSettings::validate`]; a validation failure aborts startup.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
