use std::time::Duration;

/// Failures talking to the remote context store.
/// Every variant degrades to local-only operation; `is_unavailable` also trips the breaker.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote timeout after {0:?}")]
    Timeout(Duration),
    #[error("remote protocol error: {0}")]
    Protocol(String),
    #[error("remote status {status}: {body}")]
    Status { status: u16, body: String },
}

impl RemoteError {
    /// Transport-level failure: connection refused, timeout, 5xx, throttling.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Protocol(_) => false,
        }
    }

    pub fn is_protocol(&self) -> bool {
        !self.is_unavailable()
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::Status { .. } => "status",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 | 500..=599 => Self::Status { status, body },
            _ => Self::Protocol(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Failures producing a synopsis. Never fatal to the conversation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("model error: {0}")]
    Model(String),
    #[error("model returned an empty synopsis")]
    Empty,
    #[error("summarization timed out after {0:?}")]
    Timeout(Duration),
}

impl SummarizationError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Empty => "empty",
            Self::Timeout(_) => "timeout",
        }
    }
}
