use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use colloquy_core::{SummarizationError, Turn};

use crate::chat::{ChatMessage, ChatModel};

const INSTRUCTIONS: &str = "Summarize the conversation below so it can replace the original \
turns as context for continuing it. Keep names, facts the user stated about themselves, \
decisions, open questions and commitments. Write plain prose, no preamble.";

/// Compacts a run of turns into synopsis text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizationError>;
}

/// One chat completion per call; no retries.
pub struct LlmSummarizer {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    fn transcript(turns: &[Turn]) -> String {
        let mut out = String::new();
        for turn in turns {
            if turn.is_synopsis() {
                out.push_str("[earlier summary] ");
            } else {
                out.push_str(turn.role.as_str());
                out.push_str(": ");
            }
            out.push_str(&turn.content);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip_all, fields(model = self.model.model(), turns = turns.len()))]
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizationError> {
        let messages = [
            ChatMessage::system(INSTRUCTIONS),
            ChatMessage::user(Self::transcript(turns)),
        ];

        let text = tokio::time::timeout(self.timeout, self.model.complete(&messages))
            .await
            .map_err(|_| SummarizationError::Timeout(self.timeout))?
            .map_err(|e| SummarizationError::Model(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizationError::Empty);
        }
        debug!(chars = text.len(), "synopsis produced");
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::mock::{MockChatModel, MockReply};
    use colloquy_core::Role;

    fn summarizer(replies: Vec<MockReply>) -> (Arc<MockChatModel>, LlmSummarizer) {
        let model = Arc::new(MockChatModel::new(replies));
        let s = LlmSummarizer::new(model.clone(), Duration::from_secs(5));
        (model, s)
    }

    #[tokio::test]
    async fn sends_transcript_and_trims_reply() {
        let (model, s) = summarizer(vec![MockReply::text("  Sam introduced themselves.\n")]);
        let turns = vec![
            Turn::synopsis("Earlier: greetings.", 2),
            Turn::user("My name is Sam"),
            Turn::assistant("Nice to meet you, Sam"),
        ];
        let text = s.summarize(&turns).await.unwrap();
        assert_eq!(text, "Sam introduced themselves.");

        let sent = model.last_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(
            sent[1].content,
            "[earlier summary] Earlier: greetings.\nuser: My name is Sam\nassistant: Nice to meet you, Sam\n"
        );
    }

    #[tokio::test]
    async fn blank_reply_is_empty_error() {
        let (_, s) = summarizer(vec![MockReply::text("   ")]);
        let err = s.summarize(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Empty));
    }

    #[tokio::test]
    async fn model_error_is_wrapped() {
        let (_, s) = summarizer(vec![MockReply::Error(LlmError::RateLimited)]);
        let err = s.summarize(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Model(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let model = Arc::new(MockChatModel::new(vec![MockReply::delayed(
            Duration::from_secs(60),
            MockReply::text("late"),
        )]));
        let s = LlmSummarizer::new(model, Duration::from_secs(1));
        let err = s.summarize(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Timeout(_)));
    }
}
