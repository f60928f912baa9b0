//! Repositories translate domain aggregates to and from the [`crate::kvs`]
//! port. Each repository owns the attribute-name mapping for its table and
//! the conditional-update predicates that implement optimistic concurrency;
//! the domain layer above never sees raw [`crate::kvs::Item`]s.

pub mod counters;
pub mod romance;

pub use counters::CountersRepository;
pub use romance::RomanceRepository;

/// Errors a repository surfaces to the operations layer. `VersionConflict`
/// is the one variant operations are expected to retry on; `Domain` carries
/// a validation failure the repository itself caught (e.g. changing a vote
/// that doesn't exist yet) so callers can match on it the same way they
/// would any other [`crate::domain::VoteError`]; everything else is a
/// passthrough backend failure.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("version conflict")]
    VersionConflict,
    #[error(transparent)]
    Domain(#[from] crate::domain::VoteError),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<crate::kvs::KvsError> for RepoError {
    fn from(err: crate::kvs::KvsError) -> Self {
        match err {
            crate::kvs::KvsError::ConditionalCheckFailed => RepoError::VersionConflict,
            crate::kvs::KvsError::NotFound => RepoError::Backend("item not found".to_string()),
            crate::kvs::KvsError::Backend(msg) => RepoError::Backend(msg),
        }
    }
}
