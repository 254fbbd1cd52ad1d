use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn, Instrument};

use colloquy_core::{
    Conversation, ConversationKey, RemoteError, Role, SummarizationError, Turn, TurnMetadata,
};
use colloquy_llm::Summarizer;
use colloquy_remote::{ContextInfo, ContextStore};
use colloquy_store::{ContextMap, ContextMapEntry, LocalRecord, LocalStore, RecordSummary, StoreError};

use crate::compaction::{plan_compaction, plan_truncation, truncation_marker};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::locks::{KeyGuard, KeyLocks};
use crate::search::{search_records, Scope, SearchHit, TermQuery};
use crate::stats::{RemoteStats, RemoteStatsSnapshot};
use crate::tokens::{HeuristicEstimator, TokenEstimator};

/// What `summarize_if_needed` did.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SummarizeOutcome {
    /// No record exists for the key.
    Empty,
    UnderBudget { tokens: u32 },
    /// Over budget, but only recent turns and a synopsis remain.
    NothingToCompact { tokens: u32 },
    Compacted {
        compacted_turns: usize,
        tokens_before: u32,
        tokens_after: u32,
    },
    /// Summarization failed and the hard cap moved old turns to the archive.
    Truncated {
        archived_turns: usize,
        #[serde(serialize_with = "as_display")]
        error: SummarizationError,
    },
    /// Summarization failed; history left to grow.
    Skipped {
        #[serde(serialize_with = "as_display")]
        error: SummarizationError,
    },
    /// The active view changed while the synopsis was being produced.
    Superseded,
}

fn as_display<S: serde::Serializer>(
    error: &SummarizationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("context map: {0}")]
    Map(#[from] StoreError),
}

impl SyncError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Remote(e) => e.error_kind(),
            Self::Map(_) => "context_map",
        }
    }
}

struct Inner {
    local: LocalStore,
    map: ContextMap,
    remote: Option<Arc<dyn ContextStore>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    estimator: Arc<dyn TokenEstimator>,
    locks: KeyLocks,
    config: EngineConfig,
    stats: RemoteStats,
}

pub struct ManagerBuilder {
    local: LocalStore,
    map: ContextMap,
    remote: Option<Arc<dyn ContextStore>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    estimator: Arc<dyn TokenEstimator>,
    config: EngineConfig,
}

impl ManagerBuilder {
    pub fn remote(mut self, remote: Arc<dyn ContextStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ConversationManager {
        info!(
            records = %self.local.root().display(),
            mapped = self.map.len(),
            remote = self.remote.is_some(),
            summarizer = self.summarizer.is_some(),
            "conversation manager ready"
        );
        ConversationManager {
            inner: Arc::new(Inner {
                local: self.local,
                map: self.map,
                remote: self.remote,
                summarizer: self.summarizer,
                estimator: self.estimator,
                locks: KeyLocks::new(),
                config: self.config,
                stats: RemoteStats::default(),
            }),
        }
    }
}

/// Durable, ordered conversation history with a best-effort remote mirror.
///
/// The local record is authoritative: every mutation is committed to it
/// before the call returns, and only local failures reach the caller. The
/// remote store receives the same turns afterwards, under the key's lock and
/// a bounded timeout, so per-key order holds on both sides.
#[derive(Clone)]
pub struct ConversationManager {
    inner: Arc<Inner>,
}

impl ConversationManager {
    pub fn builder(local: LocalStore, map: ContextMap) -> ManagerBuilder {
        ManagerBuilder {
            local,
            map,
            remote: None,
            summarizer: None,
            estimator: Arc::new(HeuristicEstimator),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Active view for `key`. Reads the remote journal when the key is mapped
    /// and the journal is complete; otherwise the local record.
    #[instrument(skip_all, fields(conversation_key = %key))]
    pub async fn load(&self, key: &ConversationKey) -> Result<Conversation, EngineError> {
        let local = self.inner.read_local(key).await?;
        let journal_len = local.as_ref().map_or(0, |r| r.journal_len);

        if let Some(conversation) = self.inner.read_remote(key, journal_len).await {
            return Ok(conversation);
        }
        Ok(local
            .map(|r| r.conversation())
            .unwrap_or_else(|| Conversation::empty(key.clone())))
    }

    /// Turns compacted out of the active view, oldest first.
    #[instrument(skip_all, fields(conversation_key = %key))]
    pub async fn load_archive(&self, key: &ConversationKey) -> Result<Vec<Turn>, EngineError> {
        Ok(self
            .inner
            .read_local(key)
            .await?
            .map(|r| r.archive)
            .unwrap_or_default())
    }

    #[instrument(skip_all, fields(conversation_key = %key, role = %role))]
    pub async fn append(
        &self,
        key: &ConversationKey,
        role: Role,
        content: impl Into<String>,
        metadata: TurnMetadata,
    ) -> Result<Turn, EngineError> {
        let content = content.into();
        let guard = self.inner.locks.acquire(key).await;
        let mut record = self
            .inner
            .read_local(key)
            .await?
            .unwrap_or_else(|| LocalRecord::new(key.clone()));

        let turn = Turn::new(role, content, metadata);
        record.push(turn.clone());
        self.inner.commit(guard, record, vec![turn.clone()]).await?;

        debug!(content_hash = %turn.content_hash, "turn appended");
        Ok(turn)
    }

    /// `summarize_if_needed` against the configured budget.
    pub async fn compact(&self, key: &ConversationKey) -> Result<SummarizeOutcome, EngineError> {
        self.summarize_if_needed(key, self.inner.config.token_budget)
            .await
    }

    /// Fold the oldest active turns into one synopsis when the active view is
    /// over `token_budget`. Repeating the call without new turns is a no-op.
    ///
    /// The summarizer runs outside the key lock; the synopsis is applied only
    /// if the summarized prefix is still the head of the active view.
    #[instrument(skip_all, fields(conversation_key = %key, token_budget = token_budget))]
    pub async fn summarize_if_needed(
        &self,
        key: &ConversationKey,
        token_budget: u32,
    ) -> Result<SummarizeOutcome, EngineError> {
        let Some(snapshot) = self.inner.read_local(key).await? else {
            return Ok(SummarizeOutcome::Empty);
        };

        let estimator = self.inner.estimator.as_ref();
        let tokens = estimator.estimate_turns(&snapshot.turns);
        if tokens <= token_budget {
            return Ok(SummarizeOutcome::UnderBudget { tokens });
        }
        let Some(prefix_len) = plan_compaction(
            &snapshot.turns,
            estimator,
            token_budget,
            self.inner.config.preserve_recent_turns,
        ) else {
            return Ok(SummarizeOutcome::NothingToCompact { tokens });
        };

        let prefix = snapshot.turns[..prefix_len].to_vec();
        match self.inner.summarize(&prefix).await {
            Ok(text) => self.apply_synopsis(key, prefix, text, tokens).await,
            Err(error) => {
                warn!(
                    conversation_key = %key,
                    error_kind = error.error_kind(),
                    error = %error,
                    turns = prefix_len,
                    "summarization failed, compaction skipped"
                );
                self.apply_cap(key, error).await
            }
        }
    }

    async fn apply_synopsis(
        &self,
        key: &ConversationKey,
        prefix: Vec<Turn>,
        text: String,
        tokens_before: u32,
    ) -> Result<SummarizeOutcome, EngineError> {
        let guard = self.inner.locks.acquire(key).await;
        let Some(mut record) = self.inner.read_local(key).await? else {
            return Ok(SummarizeOutcome::Superseded);
        };
        if !record.turns.starts_with(&prefix) {
            info!("active view changed during summarization, synopsis dropped");
            return Ok(SummarizeOutcome::Superseded);
        }

        let synopsis = Turn::synopsis(text, prefix.len() as u32);
        record.compact(prefix.len(), synopsis.clone());
        let tokens_after = self.inner.estimator.estimate_turns(&record.turns);
        self.inner.commit(guard, record, vec![synopsis]).await?;

        info!(
            compacted_turns = prefix.len(),
            tokens_before, tokens_after, "conversation compacted"
        );
        Ok(SummarizeOutcome::Compacted {
            compacted_turns: prefix.len(),
            tokens_before,
            tokens_after,
        })
    }

    async fn apply_cap(
        &self,
        key: &ConversationKey,
        error: SummarizationError,
    ) -> Result<SummarizeOutcome, EngineError> {
        let Some(cap) = self.inner.config.max_active_turns else {
            return Ok(SummarizeOutcome::Skipped { error });
        };
        let guard = self.inner.locks.acquire(key).await;
        let Some(mut record) = self.inner.read_local(key).await? else {
            return Ok(SummarizeOutcome::Skipped { error });
        };
        let Some(prefix_len) = plan_truncation(&record.turns, cap) else {
            return Ok(SummarizeOutcome::Skipped { error });
        };

        let marker = truncation_marker(prefix_len);
        record.compact(prefix_len, marker.clone());
        self.inner.commit(guard, record, vec![marker]).await?;

        warn!(archived_turns = prefix_len, cap, "active history truncated to cap");
        Ok(SummarizeOutcome::Truncated {
            archived_turns: prefix_len,
            error,
        })
    }

    /// Local-only keyword search over every record under this store root.
    pub async fn search_past(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, EngineError> {
        self.search(None, None, query, limit).await
    }

    /// As `search_past`, restricted to keys starting with `scope`, optionally
    /// skipping the conversation the caller is currently in.
    pub async fn search_past_scoped(
        &self,
        scope: &str,
        exclude: Option<&ConversationKey>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, EngineError> {
        self.search(Some(scope.to_string()), exclude.cloned(), query, limit)
            .await
    }

    #[instrument(skip_all, fields(scope = prefix.as_deref(), limit = limit))]
    async fn search(
        &self,
        prefix: Option<String>,
        exclude: Option<ConversationKey>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, EngineError> {
        let local = self.inner.local.clone();
        let query = TermQuery::parse(query);
        let hits = tokio::task::spawn_blocking(move || {
            let records = local.scan()?;
            let scope = Scope {
                prefix: prefix.as_deref(),
                exclude: exclude.as_ref(),
            };
            Ok::<_, StoreError>(search_records(&records, &query, scope, limit))
        })
        .await??;
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }

    /// Remove the local record, best-effort delete the remote context, then
    /// drop the mapping. Unseen keys are a no-op.
    ///
    /// Runs as its own task so a cancelled caller cannot leave the mapping
    /// behind a deleted record.
    #[instrument(skip_all, fields(conversation_key = %key))]
    pub async fn delete(&self, key: &ConversationKey) -> Result<(), EngineError> {
        let guard = self.inner.locks.acquire(key).await;
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::spawn(
            async move {
                let _guard = guard;
                inner.delete_locked(&key).await
            }
            .in_current_span(),
        )
        .await?
    }

    /// Per-key summaries of every local record, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<RecordSummary>, EngineError> {
        let local = self.inner.local.clone();
        let mut summaries: Vec<RecordSummary> = tokio::task::spawn_blocking(move || {
            local
                .scan()
                .map(|records| records.iter().map(LocalRecord::summary).collect::<Vec<_>>())
        })
        .await??;
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn context_map_entries(&self) -> Vec<ContextMapEntry> {
        self.inner.map.entries()
    }

    /// Contexts the remote store reports, or `None` when it is disabled or unreachable.
    pub async fn remote_contexts(&self) -> Option<Vec<ContextInfo>> {
        let remote = self.inner.remote.as_ref()?;
        match timeout(self.inner.config.remote_timeout, remote.list_contexts()).await {
            Ok(Ok(contexts)) => Some(contexts),
            Ok(Err(e)) => {
                warn!(op = "list_contexts", error_kind = e.error_kind(), error = %e, "remote list failed");
                None
            }
            Err(_) => {
                warn!(op = "list_contexts", error_kind = "timeout", "remote list timed out");
                None
            }
        }
    }

    pub async fn remote_health(&self) -> bool {
        let Some(remote) = self.inner.remote.as_ref() else {
            return false;
        };
        matches!(
            timeout(self.inner.config.remote_timeout, remote.health_check()).await,
            Ok(Ok(()))
        )
    }

    pub fn remote_stats(&self) -> RemoteStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Wait until no mutation, including its remote follow-up, is in flight for `key`.
    pub async fn wait_idle(&self, key: &ConversationKey) {
        drop(self.inner.locks.acquire(key).await);
    }

    /// Keys with a live lock entry.
    pub fn active_locks(&self) -> usize {
        self.inner.locks.len()
    }
}

impl Inner {
    async fn read_local(&self, key: &ConversationKey) -> Result<Option<LocalRecord>, EngineError> {
        let local = self.local.clone();
        let key = key.clone();
        let record = tokio::task::spawn_blocking(move || local.read(&key)).await??;
        Ok(record)
    }

    async fn read_remote(&self, key: &ConversationKey, journal_len: u64) -> Option<Conversation> {
        let remote = self.remote.as_ref()?;
        let id = self.map.get(key)?;
        let limit = self.config.remote_read_limit.max(journal_len as usize);

        self.stats.read_attempted();
        let result = match timeout(self.config.remote_timeout, remote.get_turns(&id, limit)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.config.remote_timeout)),
        };

        match result {
            Ok(journal) if journal.len() as u64 >= journal_len => {
                debug!(remote_context_id = %id, turns = journal.len(), "loaded from remote");
                Some(Conversation::replay(key.clone(), journal))
            }
            Ok(journal) => {
                self.stats.read_stale();
                warn!(
                    conversation_key = %key,
                    remote_context_id = %id,
                    op = "load",
                    remote_turns = journal.len(),
                    local_turns = journal_len,
                    "remote journal behind local record, reading local"
                );
                None
            }
            Err(e) => {
                self.stats.read_failed();
                warn!(
                    conversation_key = %key,
                    remote_context_id = %id,
                    op = "load",
                    error_kind = e.error_kind(),
                    error = %e,
                    "remote read failed, reading local"
                );
                None
            }
        }
    }

    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizationError> {
        let Some(summarizer) = self.summarizer.as_ref() else {
            return Err(SummarizationError::Model("no summarizer configured".into()));
        };
        match timeout(self.config.summarize_timeout, summarizer.summarize(turns)).await {
            Ok(result) => result,
            Err(_) => Err(SummarizationError::Timeout(self.config.summarize_timeout)),
        }
    }

    /// Write `record` atomically, then hand `outgoing` to the remote in a
    /// follower task that owns the key lock.
    ///
    /// Both halves are spawned: dropping the caller neither interrupts the
    /// local write nor releases the lock before the remote attempt ends.
    async fn commit(
        self: &Arc<Self>,
        guard: KeyGuard,
        record: LocalRecord,
        outgoing: Vec<Turn>,
    ) -> Result<(), EngineError> {
        let key = record.key.clone();
        let (committed_tx, committed_rx) = oneshot::channel::<()>();

        let local = self.local.clone();
        let write = tokio::task::spawn_blocking(move || {
            local.write(&record)?;
            let _ = committed_tx.send(());
            Ok::<_, StoreError>(())
        });

        let inner = Arc::clone(self);
        let follower_key = key.clone();
        tokio::spawn(
            async move {
                let _guard = guard;
                if committed_rx.await.is_ok() {
                    inner.push_remote(&follower_key, &outgoing).await;
                }
            }
            .in_current_span(),
        );

        match write.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(conversation_key = %key, error_kind = e.error_kind(), error = %e, "local write failed");
                Err(EngineError::Persistence(e))
            }
            Err(e) => {
                error!(conversation_key = %key, error = %e, "local write task failed");
                Err(e.into())
            }
        }
    }

    async fn push_remote(&self, key: &ConversationKey, outgoing: &[Turn]) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        if outgoing.is_empty() {
            return;
        }

        self.stats.write_attempted();
        let deadline = Instant::now() + self.config.remote_timeout;
        let result = match timeout_at(deadline, self.sync_turns(remote.as_ref(), key, outgoing)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.config.remote_timeout).into()),
        };

        if let Err(e) = result {
            self.stats.write_failed();
            warn!(
                conversation_key = %key,
                op = "append",
                error_kind = e.error_kind(),
                error = %e,
                "remote write failed, local record stays authoritative"
            );
        }
    }

    async fn sync_turns(
        &self,
        remote: &dyn ContextStore,
        key: &ConversationKey,
        outgoing: &[Turn],
    ) -> Result<(), SyncError> {
        let id = match self.map.get(key) {
            Some(id) => id,
            None => {
                let id = remote.create_context(key.as_str()).await?;
                self.map.put(key, &id)?;
                info!(conversation_key = %key, remote_context_id = %id, "remote context created");
                id
            }
        };
        for turn in outgoing {
            remote.append_turn(&id, turn).await?;
        }
        Ok(())
    }

    async fn delete_locked(&self, key: &ConversationKey) -> Result<(), EngineError> {
        let local = self.local.clone();
        let owned_key = key.clone();
        let removed_local = tokio::task::spawn_blocking(move || local.delete(&owned_key)).await??;

        let Some(id) = self.map.get(key) else {
            debug!(removed_local, "conversation deleted");
            return Ok(());
        };

        if let Some(remote) = self.remote.as_ref() {
            match timeout(self.config.remote_timeout, remote.delete_context(&id)).await {
                Ok(Ok(existed)) => debug!(remote_context_id = %id, existed, "remote context deleted"),
                Ok(Err(e)) => warn!(
                    conversation_key = %key,
                    remote_context_id = %id,
                    op = "delete",
                    error_kind = e.error_kind(),
                    error = %e,
                    "remote delete failed, context orphaned"
                ),
                Err(_) => warn!(
                    conversation_key = %key,
                    remote_context_id = %id,
                    op = "delete",
                    error_kind = "timeout",
                    "remote delete timed out, context orphaned"
                ),
            }
        }

        self.map.remove(key)?;
        info!(removed_local, remote_context_id = %id, "conversation deleted");
        Ok(())
    }
}
