use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Every fallible public operation in the relay returns one of these kinds.
/// Callers branch on the variant, never on message text; only `Transient` is
/// safe to swallow and retry while a deadline is still in the future.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Precondition(String),

    #[error("telegram {method} status {status}: {body}")]
    Provider {
        method: &'static str,
        status: u16,
        body: String,
    },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl RelayError {
    /// Retried implicitly by the coordinator's wait loop; everything else
    /// surfaces after best-effort pending cleanup.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transient(_))
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        RelayError::Store(err.to_string())
    }
}
