//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a partial file
//! only names the values it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub remote: RemoteSettings,
    pub compaction: CompactionSettings,
    pub llm: LlmSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(SettingsError::InvalidValue("storage.dataDir is empty".into()));
        }
        if self.remote.enabled && self.remote.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "remote.baseUrl is required when the remote is enabled".into(),
            ));
        }
        if self.remote.timeout_ms < 2 {
            return Err(SettingsError::InvalidValue("remote.timeoutMs must be at least 2".into()));
        }
        if self.remote.read_limit == 0 {
            return Err(SettingsError::InvalidValue("remote.readLimit must be positive".into()));
        }
        if self.compaction.max_active_turns == Some(0) {
            return Err(SettingsError::InvalidValue(
                "compaction.maxActiveTurns must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Root for records, the context map and the log database.
    pub data_dir: String,
    /// Directory name for per-conversation records under `data_dir`.
    pub records_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: crate::loader::colloquy_home().to_string_lossy().into_owned(),
            records_dir: "records".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn records_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.records_dir)
    }

    pub fn context_map_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("context_map.db")
    }

    pub fn log_db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("logs.db")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Name of the env var holding the bearer token, if the store needs one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Deadline for one remote operation, which may span several requests.
    pub timeout_ms: u64,
    /// Turns requested per journal read.
    pub read_limit: usize,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8400".to_string(),
            api_key_env: Some("COLLOQUY_REMOTE_API_KEY".to_string()),
            timeout_ms: 3_000,
            read_limit: 500,
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl RemoteSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-request HTTP timeout, strictly shorter than the operation deadline
    /// so a hung request fails on its own before the operation is abandoned.
    pub fn request_timeout(&self) -> Duration {
        let ms = self.timeout_ms;
        Duration::from_millis(ms.saturating_sub((ms / 4).max(1)).max(1))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    pub token_budget: u32,
    pub preserve_recent_turns: usize,
    /// Hard cap on active turns, applied only when summarization fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_active_turns: Option<usize>,
    pub summarize_timeout_ms: u64,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            token_budget: 6_000,
            preserve_recent_turns: 6,
            max_active_turns: None,
            summarize_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// Without a model, compaction always reports a skipped summarization.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Deadline for one remote operation, which may span several requests.
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_ms: 30_000,
            max_tokens: 512,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Persist warn+ events to `logs.db` under the data dir.
    pub log_to_sqlite: bool,
    /// Persisted events kept across restarts; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_persisted_events: Option<usize>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            log_to_sqlite: false,
            max_persisted_events: Some(10_000),
        }
    }
}
