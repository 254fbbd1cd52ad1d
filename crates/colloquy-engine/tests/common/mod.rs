#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colloquy_core::{ConversationKey, Role, Turn, TurnMetadata};
use colloquy_engine::{ConversationManager, EngineConfig, ManagerBuilder};
use colloquy_llm::{LlmSummarizer, MockChatModel, MockReply};
use colloquy_remote::{ContextStore, InMemoryContextStore};
use colloquy_store::{ContextMap, Database, LocalStore};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<InMemoryContextStore>,
    pub model: Arc<MockChatModel>,
    pub manager: ConversationManager,
}

pub fn config() -> EngineConfig {
    EngineConfig {
        token_budget: 100_000,
        preserve_recent_turns: 4,
        max_active_turns: None,
        remote_timeout: Duration::from_millis(200),
        remote_read_limit: 500,
        summarize_timeout: Duration::from_secs(2),
    }
}

pub fn harness() -> Harness {
    harness_with(config(), Vec::new())
}

pub fn harness_with(config: EngineConfig, replies: Vec<MockReply>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryContextStore::new());
    let model = Arc::new(MockChatModel::new(replies));
    let manager = open_manager(dir.path(), config, Some(remote.clone()), model.clone());
    Harness {
        dir,
        remote,
        model,
        manager,
    }
}

pub fn open_manager(
    root: &Path,
    config: EngineConfig,
    remote: Option<Arc<InMemoryContextStore>>,
    model: Arc<MockChatModel>,
) -> ConversationManager {
    let summarizer = Arc::new(LlmSummarizer::new(model, Duration::from_secs(2)));
    let mut builder = builder_at(root).config(config).summarizer(summarizer);
    if let Some(remote) = remote {
        builder = builder.remote(remote);
    }
    builder.build()
}

pub fn open_manager_with_remote(
    root: &Path,
    config: EngineConfig,
    remote: Arc<dyn ContextStore>,
) -> ConversationManager {
    builder_at(root).config(config).remote(remote).build()
}

fn builder_at(root: &Path) -> ManagerBuilder {
    let local = LocalStore::open(root.join("records")).unwrap();
    let map = ContextMap::open(Database::open(&root.join("context_map.db")).unwrap()).unwrap();
    ConversationManager::builder(local, map)
}

pub fn key(s: &str) -> ConversationKey {
    ConversationKey::from_raw(s)
}

pub async fn say(manager: &ConversationManager, key: &ConversationKey, role: Role, content: &str) -> Turn {
    manager
        .append(key, role, content, TurnMetadata::default())
        .await
        .unwrap()
}

pub fn contents(turns: &[Turn]) -> Vec<String> {
    turns.iter().map(|t| t.content.clone()).collect()
}
