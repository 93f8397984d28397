//! Errors raised by the release orchestrator.

use confgrid_state::StateError;
use thiserror::Error;

pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A precondition on the request failed; nothing was written.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A unique constraint in the store rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(StateError),
}

impl ReleaseError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ReleaseError::NotFound(what.into())
    }

    pub fn bad_request(why: impl Into<String>) -> Self {
        ReleaseError::BadRequest(why.into())
    }

    /// Errors caused by the request rather than by storage.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReleaseError::NotFound(_) | ReleaseError::BadRequest(_) | ReleaseError::Conflict(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReleaseError::Conflict(_))
    }
}

impl From<StateError> for ReleaseError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict(msg) => ReleaseError::Conflict(msg),
            StateError::NotFound(msg) => ReleaseError::NotFound(msg),
            other => ReleaseError::State(other),
        }
    }
}
