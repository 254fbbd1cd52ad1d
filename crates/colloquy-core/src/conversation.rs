use serde::{Deserialize, Serialize};

use crate::ids::ConversationKey;
use crate::turn::Turn;

/// The active view of one conversation: an optional synopsis turn first,
/// then the un-compacted turns in append order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn empty(key: ConversationKey) -> Self {
        Self {
            key,
            turns: Vec::new(),
        }
    }

    pub fn new(key: ConversationKey, turns: Vec<Turn>) -> Self {
        Self { key, turns }
    }

    /// Rebuild the active view from a linear append journal.
    ///
    /// Ordinary turns are pushed. A synopsis carrying `compacted_turns = k`
    /// replaces the first `k` active turns (which may include an older synopsis).
    pub fn replay(key: ConversationKey, journal: impl IntoIterator<Item = Turn>) -> Self {
        let mut active: Vec<Turn> = Vec::new();
        for turn in journal {
            match turn.synopsis_marker().map(|m| m.compacted_turns) {
                Some(k) => {
                    let k = (k as usize).min(active.len());
                    active.drain(..k);
                    active.insert(0, turn);
                }
                None => active.push(turn),
            }
        }
        Self { key, turns: active }
    }

    pub fn synopsis(&self) -> Option<&Turn> {
        self.turns.first().filter(|t| t.is_synopsis())
    }

    /// Turns after the synopsis, if any.
    pub fn recent(&self) -> &[Turn] {
        match self.synopsis() {
            Some(_) => &self.turns[1..],
            None => &self.turns,
        }
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
