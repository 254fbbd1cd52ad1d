use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use colloquy_core::{ConversationKey, RemoteContextId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMapEntry {
    pub conversation_key: ConversationKey,
    pub remote_context_id: RemoteContextId,
    pub created_at: DateTime<Utc>,
}

/// Conversation key to remote context id, loaded fully at open and written
/// through to SQLite on every mutation. Readers only touch the cache.
pub struct ContextMap {
    db: Database,
    cache: RwLock<HashMap<ConversationKey, ContextMapEntry>>,
}

impl ContextMap {
    pub fn open(db: Database) -> Result<Self, StoreError> {
        let entries = db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_key, remote_context_id, created_at FROM context_map",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (key, remote, created_at) = row?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| StoreError::Serialization(format!("created_at for {key}: {e}")))?
                    .with_timezone(&Utc);
                out.push(ContextMapEntry {
                    conversation_key: ConversationKey::from(key),
                    remote_context_id: RemoteContextId::from(remote),
                    created_at,
                });
            }
            Ok(out)
        })?;

        info!(entries = entries.len(), "context map loaded");

        let cache = entries
            .into_iter()
            .map(|e| (e.conversation_key.clone(), e))
            .collect();
        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    pub fn get(&self, key: &ConversationKey) -> Option<RemoteContextId> {
        self.cache
            .read()
            .get(key)
            .map(|e| e.remote_context_id.clone())
    }

    #[instrument(skip_all, fields(conversation_key = %key, remote_context_id = %remote))]
    pub fn put(&self, key: &ConversationKey, remote: &RemoteContextId) -> Result<(), StoreError> {
        let entry = ContextMapEntry {
            conversation_key: key.clone(),
            remote_context_id: remote.clone(),
            created_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO context_map (conversation_key, remote_context_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_key) DO UPDATE SET
                    remote_context_id = excluded.remote_context_id,
                    created_at = excluded.created_at",
                params![key.as_str(), remote.as_str(), entry.created_at.to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.cache.write().insert(key.clone(), entry);
        debug!("context mapped");
        Ok(())
    }

    /// Returns the id that was mapped, if any.
    #[instrument(skip_all, fields(conversation_key = %key))]
    pub fn remove(&self, key: &ConversationKey) -> Result<Option<RemoteContextId>, StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM context_map WHERE conversation_key = ?1",
                params![key.as_str()],
            )?)
        })?;
        let previous = self.cache.write().remove(key).map(|e| e.remote_context_id);
        if removed > 0 {
            debug!("context unmapped");
        }
        Ok(previous)
    }

    pub fn entries(&self) -> Vec<ContextMapEntry> {
        let mut entries: Vec<_> = self.cache.read().values().cloned().collect();
        entries.sort_by(|a, b| a.conversation_key.cmp(&b.conversation_key));
        entries
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}
