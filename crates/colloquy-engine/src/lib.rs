pub mod compaction;
pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod search;
pub mod stats;
pub mod tokens;

pub use config::EngineConfig;
pub use error::EngineError;
pub use manager::{ConversationManager, ManagerBuilder, SummarizeOutcome};
pub use search::SearchHit;
pub use stats::RemoteStatsSnapshot;
pub use tokens::{HeuristicEstimator, TokenEstimator};
