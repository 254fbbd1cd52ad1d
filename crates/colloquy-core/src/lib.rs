pub mod conversation;
pub mod errors;
pub mod ids;
pub mod turn;

pub use conversation::Conversation;
pub use errors::{RemoteError, SummarizationError};
pub use ids::{ConversationKey, RemoteContextId};
pub use turn::{ContentHash, Role, SynopsisMarker, Turn, TurnMetadata};
