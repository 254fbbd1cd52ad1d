use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use colloquy_core::{RemoteContextId, RemoteError, Turn};

use crate::store::{ContextInfo, ContextStore};
use crate::wire::{AppendTurnRequest, WireTurn};

struct StoredContext {
    label: String,
    created_at: DateTime<Utc>,
    turns: Vec<serde_json::Value>,
}

impl StoredContext {
    fn decode(&self, limit: usize) -> Result<Vec<Turn>, RemoteError> {
        self.turns
            .iter()
            .take(limit)
            .map(|raw| {
                let wire: WireTurn = serde_json::from_value(raw.clone())
                    .map_err(|e| RemoteError::Protocol(format!("stored turn: {e}")))?;
                wire.into_turn()
            })
            .collect()
    }
}

/// Process-local context store with failure injection, for tests and offline runs.
///
/// Turns are held in their wire encoding so reads see exactly what an HTTP
/// server would hand back.
///
/// Write failures cover create/append/delete; read failures cover
/// health/list/get. An optional delay is applied before every call.
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: Mutex<HashMap<RemoteContextId, StoredContext>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    delay: Mutex<Option<Duration>>,
    call_count: AtomicUsize,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.set_fail_reads(fail);
        self.set_fail_writes(fail);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Raw journal of a context, bypassing failure injection.
    pub fn journal(&self, id: &RemoteContextId) -> Option<Vec<Turn>> {
        self.contexts
            .lock()
            .get(id)
            .and_then(|c| c.decode(usize::MAX).ok())
    }

    async fn enter(&self, write: bool) -> Result<(), RemoteError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = if write {
            self.fail_writes.load(Ordering::SeqCst)
        } else {
            self.fail_reads.load(Ordering::SeqCst)
        };
        if failing {
            return Err(RemoteError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn health_check(&self) -> Result<(), RemoteError> {
        self.enter(false).await
    }

    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, RemoteError> {
        self.enter(false).await?;
        let mut out: Vec<ContextInfo> = self
            .contexts
            .lock()
            .iter()
            .map(|(id, c)| ContextInfo {
                id: id.clone(),
                label: c.label.clone(),
                created_at: Some(c.created_at),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn create_context(&self, label: &str) -> Result<RemoteContextId, RemoteError> {
        self.enter(true).await?;
        let id = RemoteContextId::from(format!("ctx_{}", uuid::Uuid::now_v7()));
        self.contexts.lock().insert(
            id.clone(),
            StoredContext {
                label: label.to_string(),
                created_at: Utc::now(),
                turns: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append_turn(&self, id: &RemoteContextId, turn: &Turn) -> Result<(), RemoteError> {
        self.enter(true).await?;
        let encoded = serde_json::to_value(AppendTurnRequest::from(turn))
            .map_err(|e| RemoteError::Protocol(format!("encode turn: {e}")))?;
        let mut contexts = self.contexts.lock();
        let context = contexts
            .get_mut(id)
            .ok_or_else(|| RemoteError::Protocol(format!("unknown context {id}")))?;
        context.turns.push(encoded);
        Ok(())
    }

    async fn get_turns(&self, id: &RemoteContextId, limit: usize) -> Result<Vec<Turn>, RemoteError> {
        self.enter(false).await?;
        let contexts = self.contexts.lock();
        let context = contexts
            .get(id)
            .ok_or_else(|| RemoteError::Protocol(format!("unknown context {id}")))?;
        context.decode(limit)
    }

    async fn delete_context(&self, id: &RemoteContextId) -> Result<bool, RemoteError> {
        self.enter(true).await?;
        Ok(self.contexts.lock().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::{Role, TurnMetadata};

    #[tokio::test]
    async fn linear_append_and_read() {
        let store = InMemoryContextStore::new();
        let id = store.create_context("k").await.unwrap();
        store.append_turn(&id, &Turn::user("a")).await.unwrap();
        store.append_turn(&id, &Turn::assistant("b")).await.unwrap();

        let turns = store.get_turns(&id, 10).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert_eq!(store.get_turns(&id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn turns_come_back_through_the_wire_encoding() {
        let store = InMemoryContextStore::new();
        let id = store.create_context("k").await.unwrap();
        let meta = TurnMetadata::default().with_extra("compacted_turns", serde_json::json!(1));
        let turn = Turn::new(Role::System, "be terse", meta);
        store.append_turn(&id, &Turn::user("a")).await.unwrap();
        store.append_turn(&id, &turn).await.unwrap();

        let back = store.get_turns(&id, 10).await.unwrap();
        assert_eq!(back[1], turn);
        assert!(!back[1].is_synopsis());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = InMemoryContextStore::new();
        let a = store.create_context("k").await.unwrap();
        let b = store.create_context("k").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list_contexts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn injected_read_failure_leaves_writes_working() {
        let store = InMemoryContextStore::new();
        store.set_fail_reads(true);
        let id = store.create_context("k").await.unwrap();
        store.append_turn(&id, &Turn::user("a")).await.unwrap();
        assert!(store.get_turns(&id, 10).await.unwrap_err().is_unavailable());
        assert_eq!(store.journal(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_write_failure() {
        let store = InMemoryContextStore::new();
        store.set_fail_writes(true);
        assert!(store.create_context("k").await.is_err());
        assert_eq!(store.context_count(), 0);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryContextStore::new();
        let id = store.create_context("k").await.unwrap();
        assert!(store.delete_context(&id).await.unwrap());
        assert!(!store.delete_context(&id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied() {
        let store = InMemoryContextStore::new();
        store.set_delay(Some(Duration::from_secs(5)));
        let started = tokio::time::Instant::now();
        store.health_check().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
