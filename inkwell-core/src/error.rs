use thiserror::Error;

use crate::completion::CompletionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum InkwellError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Invalid choice {0:?}: expected \"A\" or \"B\"")]
    InvalidChoice(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl InkwellError {
    /// True when the caller sent something unusable (as opposed to a
    /// failure on our side or the provider's).
    pub fn is_client_error(&self) -> bool {
        matches!(self, InkwellError::InvalidChoice(_))
    }

    /// True when the record the operation needs does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            InkwellError::SessionNotFound(_) | InkwellError::Store(StoreError::NotFound(_))
        )
    }
}
