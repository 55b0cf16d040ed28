//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SluiceSettings::default()`]
//! 2. If `~/.sluice/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SLUICE_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SluiceSettings;

/// Resolve the path to the settings file (`~/.sluice/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sluice").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SluiceSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or an unusable value, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<SluiceSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SluiceSettings> {
    let defaults = serde_json::to_value(SluiceSettings::default())?;

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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut SluiceSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are treated as unset. Values that fail to parse or fall
/// outside their range are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut SluiceSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = env.string("SLUICE_SCHEME") {
        settings.connection.scheme = v;
    }
    if let Some(v) = env.string("SLUICE_HOST") {
        settings.connection.host = v;
    }
    if let Some(v) = env.u16("SLUICE_PORT", 1, 65535) {
        settings.connection.port = v;
    }
    if let Some(v) = env.string("SLUICE_PATH") {
        settings.connection.path = v;
    }
    if let Some(v) = env.u32("SLUICE_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.connection.max_reconnect_attempts = v;
    }
    if let Some(v) = env.u64("SLUICE_RECONNECT_INTERVAL_MS", 0, 3_600_000) {
        settings.connection.reconnect_interval_ms = v;
    }
    if let Some(v) = env.u64("SLUICE_HANDSHAKE_TIMEOUT_MS", 1, 600_000) {
        settings.connection.handshake_timeout_ms = v;
    }

    // ── Stream / logging ────────────────────────────────────────────
    if let Some(v) = env.usize("SLUICE_STREAM_BUFFER", 1, 1_000_000) {
        settings.stream.event_buffer = v;
    }
    if let Some(v) = env.string("SLUICE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers (thin wrappers) ─────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid {kind} env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> SluiceSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = SluiceSettings::default();
        apply_overrides(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"connection": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"connection": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["port"], 9090);
        assert_eq!(merged["connection"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"a": [1, 2, 3]}),
            serde_json::json!({"a": [9]}),
        );
        assert_eq!(merged["a"], serde_json::json!([9]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, SluiceSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connection": {"host": "db.internal", "maxReconnectAttempts": 2}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.connection.host, "db.internal");
        assert_eq!(settings.connection.max_reconnect_attempts, 2);
        assert_eq!(settings.connection.port, 8080);
        assert_eq!(settings.connection.reconnect_interval_ms, 3000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_rejects_invalid_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"scheme": "ftp"}}"#).unwrap();
        let settings = load_file_layer(&path).unwrap();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_applied() {
        let s = overrides(&[
            ("SLUICE_HOST", "10.0.0.5"),
            ("SLUICE_PORT", "9443"),
            ("SLUICE_SCHEME", "wss"),
            ("SLUICE_MAX_RECONNECT_ATTEMPTS", "0"),
            ("SLUICE_RECONNECT_INTERVAL_MS", "250"),
            ("SLUICE_STREAM_BUFFER", "8"),
            ("SLUICE_LOG_LEVEL", "debug"),
        ]);
        assert_eq!(s.connection.url(), "wss://10.0.0.5:9443/ws");
        assert_eq!(s.connection.max_reconnect_attempts, 0);
        assert_eq!(s.connection.reconnect_interval_ms, 250);
        assert_eq!(s.stream.event_buffer, 8);
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let s = overrides(&[
            ("SLUICE_PORT", "0"),
            ("SLUICE_HANDSHAKE_TIMEOUT_MS", "soon"),
            ("SLUICE_STREAM_BUFFER", "0"),
            ("SLUICE_HOST", ""),
        ]);
        assert_eq!(s, SluiceSettings::default());
    }

    #[test]
    fn no_env_keeps_defaults() {
        assert_eq!(overrides(&[]), SluiceSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u32_range("5", 0, 10), Some(5));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("abc", 0, 10), None);
    }
}
