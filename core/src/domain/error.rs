use super::vote_type::VoteType;

/// Coarse classification a caller can use to decide how to react to a
/// [`VoteError`] without matching on every variant — mirrors the
/// status-class split `FederationError::status_code()` exposes for HTTP,
/// kept framework-free since this crate has no REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("vote not found")]
    VoteNotFound,

    #[error("vote already has this value")]
    VoteDuplicate,

    #[error("vote type change from `{from}` to `{to}` is not allowed")]
    WrongVote { from: VoteType, to: VoteType },
}

impl VoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VoteError::Validation(_) => ErrorClass::BadRequest,
            VoteError::VoteNotFound => ErrorClass::NotFound,
            VoteError::VoteDuplicate => ErrorClass::BadRequest,
            VoteError::WrongVote { .. } => ErrorClass::BadRequest,
        }
    }
}
