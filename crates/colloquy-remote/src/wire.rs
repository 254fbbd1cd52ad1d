use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use colloquy_core::{ContentHash, RemoteContextId, RemoteError, Role, Turn, TurnMetadata};

use crate::store::ContextInfo;

#[derive(Serialize)]
pub(crate) struct CreateContextRequest<'a> {
    pub label: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct CreateContextResponse {
    pub id: RemoteContextId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AppendTurnRequest<'a> {
    pub role: Role,
    pub content: &'a str,
    pub metadata: &'a TurnMetadata,
    pub timestamp: DateTime<Utc>,
    pub content_hash: &'a ContentHash,
}

impl<'a> From<&'a Turn> for AppendTurnRequest<'a> {
    fn from(turn: &'a Turn) -> Self {
        Self {
            role: turn.role,
            content: &turn.content,
            metadata: &turn.metadata,
            timestamp: turn.timestamp,
            content_hash: &turn.content_hash,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct AppendTurnResponse {
    pub accepted: bool,
}

#[derive(Deserialize)]
pub(crate) struct DeleteContextResponse {
    pub deleted: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: TurnMetadata,
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "content_hash")]
    pub content_hash: Option<String>,
}

impl WireTurn {
    /// Rebuild a turn, recomputing its hash. A hash sent by the server must agree.
    pub fn into_turn(self) -> Result<Turn, RemoteError> {
        let claimed = self.content_hash;
        let turn = Turn::at(self.role, self.content, self.metadata, self.timestamp);
        if let Some(claimed) = claimed {
            if claimed != turn.content_hash.as_str() {
                return Err(RemoteError::Protocol(format!(
                    "content hash mismatch: server sent {claimed}, computed {}",
                    turn.content_hash
                )));
            }
        }
        Ok(turn)
    }
}

/// Servers may return a bare array or wrap it in an object.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum TurnsPayload {
    List(Vec<WireTurn>),
    Wrapped { turns: Vec<WireTurn> },
}

impl TurnsPayload {
    pub fn into_turns(self) -> Result<Vec<Turn>, RemoteError> {
        let wire = match self {
            Self::List(t) | Self::Wrapped { turns: t } => t,
        };
        wire.into_iter().map(WireTurn::into_turn).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ContextsPayload {
    List(Vec<ContextInfo>),
    Wrapped { contexts: Vec<ContextInfo> },
}

impl ContextsPayload {
    pub fn into_contexts(self) -> Vec<ContextInfo> {
        match self {
            Self::List(c) | Self::Wrapped { contexts: c } => c,
        }
    }
}
