use serde::Serialize;

use colloquy_core::{ConversationKey, Turn};
use colloquy_store::LocalRecord;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub key: ConversationKey,
    pub turn: Turn,
    /// Turn was compacted out of the active view.
    pub archived: bool,
}

/// Case-insensitive; every whitespace-separated term must occur in the content.
#[derive(Clone, Debug)]
pub struct TermQuery {
    terms: Vec<String>,
}

impl TermQuery {
    pub fn parse(query: &str) -> Self {
        Self {
            terms: query.split_whitespace().map(str::to_lowercase).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, content: &str) -> bool {
        let haystack = content.to_lowercase();
        self.terms.iter().all(|t| haystack.contains(t.as_str()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Scope<'a> {
    pub prefix: Option<&'a str>,
    pub exclude: Option<&'a ConversationKey>,
}

impl Scope<'_> {
    fn admits(&self, key: &ConversationKey) -> bool {
        self.prefix.map_or(true, |p| key.in_scope(p)) && self.exclude != Some(key)
    }
}

/// Newest first, at most `limit` hits.
pub fn search_records(
    records: &[LocalRecord],
    query: &TermQuery,
    scope: Scope<'_>,
    limit: usize,
) -> Vec<SearchHit> {
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = Vec::new();
    for record in records.iter().filter(|r| scope.admits(&r.key)) {
        let active = record.turns.iter().map(|t| (t, false));
        let archived = record.archive.iter().map(|t| (t, true));
        for (turn, archived) in active.chain(archived) {
            if query.matches(&turn.content) {
                hits.push(SearchHit {
                    key: record.key.clone(),
                    turn: turn.clone(),
                    archived,
                });
            }
        }
    }

    hits.sort_by(|a, b| {
        b.turn
            .timestamp
            .cmp(&a.turn.timestamp)
            .then_with(|| a.key.cmp(&b.key))
    });
    hits.truncate(limit);
    hits
}
