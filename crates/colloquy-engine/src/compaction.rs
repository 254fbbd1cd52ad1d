use colloquy_core::{SynopsisMarker, Turn};

use crate::tokens::TokenEstimator;

/// Length of the oldest prefix to fold into a synopsis, or `None` when the
/// active view is within budget or nothing but a synopsis would be folded.
pub fn plan_compaction(
    turns: &[Turn],
    estimator: &dyn TokenEstimator,
    token_budget: u32,
    preserve_recent: usize,
) -> Option<usize> {
    if estimator.estimate_turns(turns) <= token_budget {
        return None;
    }
    let prefix_len = split_point(turns.len(), preserve_recent);
    worth_folding(&turns[..prefix_len]).then_some(prefix_len)
}

/// Length of the prefix to replace with a truncation marker so that at
/// most `cap` turns remain, marker included.
pub fn plan_truncation(turns: &[Turn], cap: usize) -> Option<usize> {
    if turns.len() <= cap {
        return None;
    }
    let keep = cap.saturating_sub(1);
    let prefix_len = turns.len() - keep;
    worth_folding(&turns[..prefix_len]).then_some(prefix_len)
}

pub fn truncation_marker(prefix_len: usize) -> Turn {
    Turn::synopsis_from(
        format!("[{prefix_len} earlier turns archived without summary]"),
        SynopsisMarker {
            compacted_turns: prefix_len as u32,
            truncated: true,
        },
    )
}

/// Everything before the newest `preserve` turns.
fn split_point(len: usize, preserve: usize) -> usize {
    len.saturating_sub(preserve)
}

/// A prefix holding at most a lone synopsis has already been compacted.
fn worth_folding(prefix: &[Turn]) -> bool {
    prefix.iter().any(|t| !t.is_synopsis())
}
