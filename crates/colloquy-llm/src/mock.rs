use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chat::{ChatMessage, ChatModel};
use crate::error::LlmError;

/// Pre-programmed replies for deterministic tests.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(LlmError),
    /// Wait, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Replays replies in order; once exhausted, every call fails.
pub struct MockChatModel {
    replies: Mutex<VecDeque<MockReply>>,
    call_count: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockChatModel {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_messages.lock() = messages.to_vec();

        let mut reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("mock replies exhausted".into()))?;

        loop {
            match reply {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}
