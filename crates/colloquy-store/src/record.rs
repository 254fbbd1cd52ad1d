use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use colloquy_core::{Conversation, ConversationKey, Turn};

pub const RECORD_VERSION: u32 = 1;

/// Everything persisted locally for one conversation key.
///
/// `turns` is the active view (synopsis first when compacted). `archive` holds
/// compacted turns in their original order; nothing is ever removed from it.
/// `journal_len` counts every turn ever sent down the append path, synopses
/// included, and matches the length of a fully synced remote journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub version: u32,
    pub key: ConversationKey,
    pub journal_len: u64,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub archive: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            version: RECORD_VERSION,
            key,
            journal_len: 0,
            turns: Vec::new(),
            archive: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn conversation(&self) -> Conversation {
        Conversation::new(self.key.clone(), self.turns.clone())
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.journal_len += 1;
        self.touch();
    }

    /// Replace the first `prefix_len` active turns with `synopsis`,
    /// moving them to the archive. A previous synopsis inside the prefix is
    /// archived like any other turn.
    pub fn compact(&mut self, prefix_len: usize, synopsis: Turn) {
        let prefix_len = prefix_len.min(self.turns.len());
        let compacted: Vec<Turn> = self.turns.drain(..prefix_len).collect();
        self.archive.extend(compacted);
        self.turns.insert(0, synopsis);
        self.journal_len += 1;
        self.touch();
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            key: self.key.clone(),
            active_turns: self.turns.len(),
            archived_turns: self.archive.len(),
            journal_len: self.journal_len,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub key: ConversationKey,
    pub active_turns: usize,
    pub archived_turns: usize,
    pub journal_len: u64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(n: usize) -> LocalRecord {
        let mut record = LocalRecord::new(ConversationKey::from_raw("k"));
        for i in 0..n {
            record.push(Turn::user(format!("turn {i}")));
        }
        record
    }

    #[test]
    fn push_counts_journal() {
        let record = record_with(3);
        assert_eq!(record.turns.len(), 3);
        assert_eq!(record.journal_len, 3);
        assert!(record.archive.is_empty());
    }

    #[test]
    fn compact_moves_prefix_to_archive() {
        let mut record = record_with(5);
        record.compact(3, Turn::synopsis("first three", 3));

        let active: Vec<&str> = record.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(active, vec!["first three", "turn 3", "turn 4"]);
        let archived: Vec<&str> = record.archive.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(archived, vec!["turn 0", "turn 1", "turn 2"]);
        assert_eq!(record.journal_len, 6);
    }

    #[test]
    fn compact_matches_remote_replay() {
        let mut record = record_with(4);
        let mut journal = record.turns.clone();
        let synopsis = Turn::synopsis("s", 2);
        journal.push(synopsis.clone());
        record.compact(2, synopsis);

        let replayed = Conversation::replay(record.key.clone(), journal.clone());
        assert_eq!(replayed.turns, record.turns);
        assert_eq!(journal.len() as u64, record.journal_len);
    }

    #[test]
    fn archive_defaults_when_missing() {
        let json = serde_json::json!({
            "version": 1,
            "key": "k",
            "journal_len": 0,
            "turns": [],
            "updated_at": "2026-01-01T00:00:00Z"
        });
        let record: LocalRecord = serde_json::from_value(json).unwrap();
        assert!(record.archive.is_empty());
    }
}
