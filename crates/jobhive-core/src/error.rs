use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConversationError>;

/// Failures that stop the orchestrator from answering a message.
///
/// Corrupt session payloads and stale completions are not errors: the first
/// is treated as "no session", the second is reported as
/// [`crate::CompletionOutcome::Stale`].
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("per-user lock closed")]
    LockClosed(#[from] tokio::sync::AcquireError),
}

impl ConversationError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(err)
    }
}
