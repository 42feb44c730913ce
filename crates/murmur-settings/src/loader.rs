//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MurmurSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `MURMUR_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use murmur_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::MurmurSettings;

/// Environment variable naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "MURMUR_SETTINGS";

/// Resolve the settings file path.
///
/// `$MURMUR_SETTINGS` if set, else `~/.murmur/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(p) = std::env::var_os(SETTINGS_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".murmur").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MurmurSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MurmurSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load defaults merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<MurmurSettings> {
    let defaults = serde_json::to_value(MurmurSettings::default())?;

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

/// Apply `MURMUR_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut MurmurSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_overrides_from(settings: &mut MurmurSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };
    let server = &mut settings.server;

    if let Some(v) = env.string("MURMUR_HOST") {
        server.host = v;
    }
    if let Some(v) = env.ranged("MURMUR_PORT", 0u16, u16::MAX) {
        server.port = v;
    }
    if let Some(v) = env.ranged("MURMUR_MAX_CONNECTIONS", 1usize, 1_000_000) {
        server.max_connections = v;
    }
    if let Some(v) = env.ranged("MURMUR_MAX_MESSAGE_SIZE", 64usize, 64 * 1024 * 1024) {
        server.max_message_size = v;
    }
    if let Some(v) = env.ranged("MURMUR_OUTBOUND_QUEUE", 1usize, 65_536) {
        server.outbound_queue_capacity = v;
    }
    if let Some(v) = env.ranged("MURMUR_HEARTBEAT_INTERVAL_SECS", 1u64, 3600) {
        server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.ranged("MURMUR_HEARTBEAT_TIMEOUT_SECS", 1u64, 3600) {
        server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.ranged("MURMUR_TYPING_THROTTLE_MS", 0u64, 60_000) {
        server.typing_throttle_ms = v;
    }

    if let Some(v) = env.string("MURMUR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("MURMUR_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "MURMUR_LOG_FORMAT", value = %v, error = %e, "ignoring env var"),
        }
    }
    if let Some(v) = env.boolean("MURMUR_METRICS") {
        settings.metrics.enabled = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a number within an inclusive range.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        parsed
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let parsed = parse_in_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    }
}
