use colloquy_store::StoreError;

/// The only errors a caller of the manager ever sees. Both mean the local
/// record could not be durably updated or read.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("persistence task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed(e.to_string())
    }
}
