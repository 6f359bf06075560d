//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If `~/.parley/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ParleySettings;

/// Resolve the path to the settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
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

/// Apply `PARLEY_*` environment variables to loaded settings.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = string("PARLEY_WS_URL") {
        settings.endpoint.ws_url = v;
    }
    if let Some(v) = string("PARLEY_CHAT_PATH") {
        settings.endpoint.chat_path = v;
    }
    if let Some(v) = string("PARLEY_API_URL") {
        settings.endpoint.api_url = v;
    }
    if let Some(v) = string("PARLEY_TTS_LANGUAGE") {
        settings.speech.language = v;
    }
    if let Some(v) = string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = string("PARLEY_TTS_ENABLED") {
        match parse_bool(&raw) {
            Some(v) => settings.speech.enabled = v,
            None => warn!(key = "PARLEY_TTS_ENABLED", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(raw) = string("PARLEY_RECONNECT_MAX_ATTEMPTS") {
        match parse_u64_range(&raw, 0, 100) {
            Some(v) => settings.reconnect.max_attempts = v as u32,
            None => warn!(key = "PARLEY_RECONNECT_MAX_ATTEMPTS", value = %raw, "invalid integer env var, ignoring"),
        }
    }
    if let Some(raw) = string("PARLEY_FLUSH_INTERVAL_MS") {
        match parse_u64_range(&raw, 1, 1000) {
            Some(v) => settings.streaming.flush_interval_ms = v,
            None => warn!(key = "PARLEY_FLUSH_INTERVAL_MS", value = %raw, "invalid integer env var, ignoring"),
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
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"endpoint": {"wsUrl": "ws://a", "chatPath": "/ws/chat"}});
        let source = serde_json::json!({"endpoint": {"wsUrl": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["endpoint"]["wsUrl"], "ws://b");
        assert_eq!(merged["endpoint"]["chatPath"], "/ws/chat");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.endpoint.chat_path, "/ws/chat");
        assert_eq!(settings.reconnect.max_attempts, 5);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"endpoint": {"apiUrl": "http://10.0.0.2:8000"}, "speech": {"enabled": true}, "request": {"final_top_n": 8}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.endpoint.api_url, "http://10.0.0.2:8000");
        assert_eq!(settings.endpoint.ws_url, "ws://localhost:8000");
        assert!(settings.speech.enabled);
        assert_eq!(settings.speech.language, "en");
        assert_eq!(settings.request.final_top_n, 8);
        assert_eq!(settings.request.initial_top_k, 25);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"endpoint": {"chatPath": "chat"}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = ParleySettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("PARLEY_WS_URL", "wss://chat.example.com"),
                ("PARLEY_TTS_ENABLED", "yes"),
                ("PARLEY_RECONNECT_MAX_ATTEMPTS", "3"),
                ("PARLEY_FLUSH_INTERVAL_MS", "33"),
            ]),
        );
        assert_eq!(settings.endpoint.ws_url, "wss://chat.example.com");
        assert!(settings.speech.enabled);
        assert_eq!(settings.reconnect.max_attempts, 3);
        assert_eq!(settings.streaming.flush_interval_ms, 33);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = ParleySettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("PARLEY_TTS_ENABLED", "maybe"),
                ("PARLEY_FLUSH_INTERVAL_MS", "0"),
                ("PARLEY_RECONNECT_MAX_ATTEMPTS", "lots"),
                ("PARLEY_API_URL", ""),
            ]),
        );
        assert!(!settings.speech.enabled);
        assert_eq!(settings.streaming.flush_interval_ms, 16);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.endpoint.api_url, "http://localhost:8000");
    }

    #[test]
    fn parse_bool_accepts_common_forms() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_range_bounds_are_inclusive() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
