use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use colloquy_core::ConversationKey;

type LockTable = DashMap<ConversationKey, Arc<Mutex<()>>>;

/// One async mutex per conversation key, created on demand and dropped
/// from the table once nobody holds or waits on it.
#[derive(Clone, Default)]
pub struct KeyLocks {
    table: Arc<LockTable>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &ConversationKey) -> KeyGuard {
        let lock = self.table.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.clone(),
            table: self.table.clone(),
        }
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Holds a key's lock. `Send + 'static`, so it can be moved into a spawned task.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: ConversationKey,
    table: Arc<LockTable>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts.
        drop(self.guard.take());
        self.table
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
