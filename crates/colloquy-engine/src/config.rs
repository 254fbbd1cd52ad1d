use std::time::Duration;

/// Knobs the manager needs. Built by the caller; the engine never reads
/// files or environment itself.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub token_budget: u32,
    /// Newest active turns never folded into a synopsis.
    pub preserve_recent_turns: usize,
    /// Hard cap applied only when summarization fails.
    pub max_active_turns: Option<usize>,
    pub remote_timeout: Duration,
    pub remote_read_limit: usize,
    pub summarize_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_budget: 6000,
            preserve_recent_turns: 6,
            max_active_turns: None,
            remote_timeout: Duration::from_secs(3),
            remote_read_limit: 500,
            summarize_timeout: Duration::from_secs(30),
        }
    }
}
