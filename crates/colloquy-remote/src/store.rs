use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use colloquy_core::{RemoteContextId, RemoteError, Turn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub id: RemoteContextId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Transport contract for the remote context store.
///
/// Implementations apply their own timeout and never retry; retry and
/// fallback policy belongs to the caller. Turns are only ever appended
/// linearly to the head of a context.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn health_check(&self) -> Result<(), RemoteError>;

    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, RemoteError>;

    async fn create_context(&self, label: &str) -> Result<RemoteContextId, RemoteError>;

    async fn append_turn(&self, id: &RemoteContextId, turn: &Turn) -> Result<(), RemoteError>;

    /// Journal of the context in append order, at most `limit` turns.
    async fn get_turns(&self, id: &RemoteContextId, limit: usize) -> Result<Vec<Turn>, RemoteError>;

    /// Returns false when the context did not exist.
    async fn delete_context(&self, id: &RemoteContextId) -> Result<bool, RemoteError>;
}
