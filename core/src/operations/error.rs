use crate::domain::VoteError;

/// Errors an operation surfaces to its caller. `VersionConflict` only
/// appears once the retry budget around an optimistic-concurrency write is
/// exhausted — every retry attempt in between is invisible to the caller.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Domain(#[from] VoteError),

    #[error("version conflict after exhausting retry budget")]
    VersionConflict,

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<crate::repository::RepoError> for OperationError {
    fn from(err: crate::repository::RepoError) -> Self {
        match err {
            crate::repository::RepoError::VersionConflict => OperationError::VersionConflict,
            crate::repository::RepoError::Domain(e) => OperationError::Domain(e),
            crate::repository::RepoError::Backend(msg) => OperationError::Backend(msg),
        }
    }
}
