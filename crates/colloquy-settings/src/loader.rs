//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::Settings;

/// `~/.colloquy`, or `/tmp/.colloquy` without a home directory.
pub fn colloquy_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".colloquy")
}

pub fn settings_path() -> PathBuf {
    colloquy_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Missing file yields defaults; a malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

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

/// Apply `COLLOQUY_*` overrides from the process environment. Invalid
/// values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("COLLOQUY_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = env.string("COLLOQUY_REMOTE_URL") {
        settings.remote.base_url = v;
    }
    if let Some(v) = env.bool("COLLOQUY_REMOTE_ENABLED") {
        settings.remote.enabled = v;
    }
    if let Some(v) = env.u64("COLLOQUY_REMOTE_TIMEOUT_MS", 50, 600_000) {
        settings.remote.timeout_ms = v;
    }
    if let Some(v) = env.u64("COLLOQUY_TOKEN_BUDGET", 1, u32::MAX as u64) {
        settings.compaction.token_budget = v as u32;
    }
    if let Some(v) = env.u64("COLLOQUY_PRESERVE_RECENT", 0, 10_000) {
        settings.compaction.preserve_recent_turns = v as usize;
    }
    if let Some(v) = env.string("COLLOQUY_LLM_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = env.string("COLLOQUY_LLM_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.string("COLLOQUY_LOG_LEVEL") {
        if parse_level(&v).is_some() {
            settings.logging.level = v.to_lowercase();
        } else {
            warn!(key = "COLLOQUY_LOG_LEVEL", value = %v, "invalid log level env var, ignoring");
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalized tracing level name.
pub fn parse_level(val: &str) -> Option<&'static str> {
    match val.to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut settings = Settings::default();
        apply_overrides(&mut settings, |name| env.get(name).cloned());
        settings
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"remote": {"timeoutMs": 3000, "baseUrl": "a"}});
        let source = serde_json::json!({"remote": {"timeoutMs": 500}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["remote"]["timeoutMs"], 500);
        assert_eq!(merged["remote"]["baseUrl"], "a");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_and_primitive_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3], "x": {"nested": true}}),
            serde_json::json!({"items": [4], "x": 42}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
        assert_eq!(merged["x"], 42);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.compaction, Settings::default().compaction);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"remote": {"enabled": true, "circuitBreaker": {"failureThreshold": 5}},
                "compaction": {"preserveRecentTurns": 2}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert!(settings.remote.enabled);
        assert_eq!(settings.remote.circuit_breaker.failure_threshold, 5);
        assert_eq!(settings.remote.circuit_breaker.cooldown_ms, 30_000);
        assert_eq!(settings.compaction.preserve_recent_turns, 2);
        assert_eq!(settings.compaction.token_budget, 6_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"remote": {"readLimit": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let s = overrides(&[
            ("COLLOQUY_DATA_DIR", "/srv/colloquy"),
            ("COLLOQUY_REMOTE_URL", "http://ctx.internal"),
            ("COLLOQUY_REMOTE_ENABLED", "yes"),
            ("COLLOQUY_REMOTE_TIMEOUT_MS", "750"),
            ("COLLOQUY_TOKEN_BUDGET", "1200"),
            ("COLLOQUY_PRESERVE_RECENT", "0"),
            ("COLLOQUY_LLM_MODEL", "small-model"),
            ("COLLOQUY_LOG_LEVEL", "DEBUG"),
        ]);
        assert_eq!(s.storage.data_dir, "/srv/colloquy");
        assert_eq!(s.remote.base_url, "http://ctx.internal");
        assert!(s.remote.enabled);
        assert_eq!(s.remote.timeout_ms, 750);
        assert_eq!(s.compaction.token_budget, 1200);
        assert_eq!(s.compaction.preserve_recent_turns, 0);
        assert_eq!(s.llm.model, "small-model");
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let s = overrides(&[
            ("COLLOQUY_REMOTE_ENABLED", "maybe"),
            ("COLLOQUY_REMOTE_TIMEOUT_MS", "10"),
            ("COLLOQUY_TOKEN_BUDGET", "lots"),
            ("COLLOQUY_LOG_LEVEL", "loud"),
            ("COLLOQUY_DATA_DIR", ""),
        ]);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_level("Warning"), Some("warn"));
        assert_eq!(parse_level("verbose"), None);
    }
}
