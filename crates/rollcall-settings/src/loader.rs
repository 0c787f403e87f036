//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RollcallSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `ROLLCALL_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{DuplicatePeerPolicy, MIN_SEND_QUEUE, RollcallSettings};

/// Resolve the default settings file path (`~/.rollcall/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".rollcall").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RollcallSettings> {
    let defaults = serde_json::to_value(RollcallSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RollcallSettings = serde_json::from_value(merged)?;
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RollcallSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored so the file/default value stays in effect.
pub fn apply_overrides(settings: &mut RollcallSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let server = &mut settings.server;

    if let Some(v) = read("ROLLCALL_HOST") {
        server.host = v;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_PORT", 0, u16::MAX) {
        server.port = n;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_MAX_CONNECTIONS", 1, 1_000_000) {
        server.max_connections = n;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_MAX_SEND_QUEUE", MIN_SEND_QUEUE, 65_536) {
        server.max_send_queue = n;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_HEARTBEAT_INTERVAL_SECS", 1, 3_600) {
        server.heartbeat_interval_secs = n;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        server.heartbeat_timeout_secs = n;
    }
    if let Some(n) = read_range(&read, "ROLLCALL_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        server.max_message_size = n;
    }
    if let Some(v) = read("ROLLCALL_DUPLICATE_PEER_POLICY") {
        let parsed = v.parse::<DuplicatePeerPolicy>().ok();
        if let Some(policy) = checked(&v, "ROLLCALL_DUPLICATE_PEER_POLICY", parsed) {
            server.duplicate_peer_policy = policy;
        }
    }
    if let Some(v) = read("ROLLCALL_IDENTITIES") {
        let labels = parse_list(&v);
        let parsed = (!labels.is_empty()).then_some(labels);
        if let Some(labels) = checked(&v, "ROLLCALL_IDENTITIES", parsed) {
            settings.identities.labels = labels;
        }
    }
    if let Some(v) = read("ROLLCALL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("ROLLCALL_LOG_JSON") {
        if let Some(b) = checked(&v, "ROLLCALL_LOG_JSON", parse_bool(&v)) {
            settings.logging.json = b;
        }
    }
}

fn read_range<T>(read: &dyn Fn(&str) -> Option<String>, key: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let raw = read(key)?;
    checked(&raw, key, parse_range(&raw, min, max))
}

fn checked<T>(raw: &str, key: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming and dropping empty items.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let merged = deep_merge(
            json!({"server": {"port": 1, "host": "a"}, "x": 1}),
            json!({"server": {"port": 2}}),
        );
        assert_eq!(merged, json!({"server": {"port": 2, "host": "a"}, "x": 1}));
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"labels": ["a", "b"]}), json!({"labels": ["c"]}));
        assert_eq!(merged, json!({"labels": ["c"]}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.max_send_queue, 256);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"maxSendQueue":64},"identities":{"labels":["One","Two"]}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.max_send_queue, 64);
        assert_eq!(settings.server.heartbeat_interval_secs, 30);
        assert_eq!(settings.identities.labels, vec!["One", "Two"]);
    }

    #[test]
    fn invalid_json_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(crate::SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_combination_in_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let body = r#"{"server":{"heartbeatIntervalSecs":100,"heartbeatTimeoutSecs":5}}"#;
        std::fs::write(&path, body).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(crate::SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn overrides_apply() {
        let mut settings = RollcallSettings::default();
        let lookup = lookup_from(&[
            ("ROLLCALL_HOST", "127.0.0.1"),
            ("ROLLCALL_PORT", "9100"),
            ("ROLLCALL_MAX_SEND_QUEUE", "8"),
            ("ROLLCALL_DUPLICATE_PEER_POLICY", "reject"),
            ("ROLLCALL_IDENTITIES", "Red, Green ,,Blue"),
            ("ROLLCALL_LOG_JSON", "yes"),
            ("ROLLCALL_LOG_LEVEL", "debug"),
        ]);
        apply_overrides(&mut settings, &lookup);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.max_send_queue, 8);
        assert_eq!(settings.server.duplicate_peer_policy, DuplicatePeerPolicy::Reject);
        assert_eq!(settings.identities.labels, vec!["Red", "Green", "Blue"]);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut settings = RollcallSettings::default();
        let lookup = lookup_from(&[
            ("ROLLCALL_PORT", "99999"),
            ("ROLLCALL_MAX_SEND_QUEUE", "1"),
            ("ROLLCALL_DUPLICATE_PEER_POLICY", "evict"),
            ("ROLLCALL_IDENTITIES", " , "),
            ("ROLLCALL_LOG_JSON", "maybe"),
            ("ROLLCALL_HOST", ""),
        ]);
        apply_overrides(&mut settings, &lookup);
        let defaults = RollcallSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.max_send_queue, defaults.server.max_send_queue);
        assert_eq!(settings.server.duplicate_peer_policy, DuplicatePeerPolicy::Replace);
        assert_eq!(settings.identities.labels, defaults.identities.labels);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, defaults.server.host);
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u64>("5", 1, 10), Some(5));
        assert_eq!(parse_range::<u64>("0", 1, 10), None);
        assert_eq!(parse_range::<u64>("11", 1, 10), None);
        assert_eq!(parse_range::<u16>("-1", 0, 10), None);
        assert_eq!(parse_range::<usize>(" 7 ", 1, 10), Some(7));
    }
}
