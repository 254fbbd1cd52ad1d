use colloquy_core::Turn;

/// Per-turn framing overhead added to every estimate.
const TURN_OVERHEAD: u32 = 4;

pub trait TokenEstimator: Send + Sync {
    fn estimate_turn(&self, turn: &Turn) -> u32;

    fn estimate_turns(&self, turns: &[Turn]) -> u32 {
        turns.iter().map(|t| self.estimate_turn(t)).sum()
    }
}

/// Approximation: chars / 4, rounded up, plus framing overhead.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicEstimator;

pub fn estimate_text_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate_turn(&self, turn: &Turn) -> u32 {
        TURN_OVERHEAD + estimate_text_tokens(&turn.content)
    }
}
