pub mod chat;
pub mod error;
pub mod mock;
pub mod openai;
pub mod summarizer;

pub use chat::{ChatMessage, ChatModel};
pub use error::LlmError;
pub use mock::{MockChatModel, MockReply};
pub use openai::{OpenAiChatModel, OpenAiConfig};
pub use summarizer::{LlmSummarizer, Summarizer};
