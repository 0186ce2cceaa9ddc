//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FeedcastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{feedcast_home, FeedcastSettings};

/// Resolve the default settings file (`~/.feedcast/settings.json`).
pub fn settings_path() -> PathBuf {
    feedcast_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FeedcastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FeedcastSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<FeedcastSettings> {
    let defaults = serde_json::to_value(FeedcastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn apply_env_overrides(settings: &mut FeedcastSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
fn apply_overrides(settings: &mut FeedcastSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let raw = string(name)?;
        let parsed = parse_u64_range(&raw, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("FEEDCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = number("FEEDCAST_PORT", 0, u16::MAX as u64) {
        settings.server.port = v as u16;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = string("FEEDCAST_DATABASE_PATH") {
        settings.storage.database_path = PathBuf::from(v);
    }
    if let Some(v) = number("FEEDCAST_POLL_INTERVAL_MS", 10, 60_000) {
        settings.storage.poll_interval_ms = v;
    }

    // ── Delivery ────────────────────────────────────────────────────
    if let Some(v) = string("FEEDCAST_DELIVERY_TARGET").or_else(|| string("REGISTRATION_TOKEN")) {
        settings.delivery.target = v;
    }
    if let Some(v) = string("FEEDCAST_FCM_PROJECT_ID") {
        settings.delivery.project_id = Some(v);
    }
    if let Some(v) = string("FEEDCAST_FCM_CREDENTIALS_FILE")
        .or_else(|| string("GOOGLE_APPLICATION_CREDENTIALS"))
    {
        settings.delivery.credentials_file = Some(PathBuf::from(v));
    }
    if let Some(v) = string("FEEDCAST_FCM_ACCESS_TOKEN") {
        settings.delivery.access_token = Some(v);
    }
    if let Some(v) = string("FEEDCAST_FCM_ENDPOINT") {
        settings.delivery.endpoint = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = number("FEEDCAST_RETRY_BASE_DELAY_MS", 1, 600_000) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = number("FEEDCAST_RETRY_MAX_DELAY_MS", 1, 3_600_000) {
        settings.retry.max_delay_ms = v;
    }
    if let Some(v) = number("FEEDCAST_RETRY_MAX_ATTEMPTS", 1, 100) {
        settings.retry.max_attempts = v as u32;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("FEEDCAST_LOG_LEVEL") {
        settings.logging.level = v.to_lowercase();
    }
    if let Some(raw) = string("FEEDCAST_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => tracing::warn!(key = "FEEDCAST_LOG_JSON", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
