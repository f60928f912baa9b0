//! Vote state-machine operations, grounded in
//! `original_source/internal/context/voting/application/operation`'s
//! `add_user_vote_operation.go`, `change_user_vote_operation.go` and
//! `delete_user_vote_operation.go`: each re-fetches the romance and retries
//! the whole read-modify-write cycle on a version conflict, bounded by
//! `config::VERSION_CONFLICT_RETRIES`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{CounterUpdateGroup, Romance, Vote, VoteError, VoteId, VoteType};
use crate::repository::{CountersRepository, RepoError, RomanceRepository};

use super::error::OperationError;

pub struct VoteOperations {
    romances: Arc<RomanceRepository>,
    counters: Arc<CountersRepository>,
    version_conflict_retries: u32,
}

impl VoteOperations {
    pub fn new(
        romances: Arc<RomanceRepository>,
        counters: Arc<CountersRepository>,
        version_conflict_retries: u32,
    ) -> Self {
        Self {
            romances,
            counters,
            version_conflict_retries,
        }
    }

    /// `from == to` always fails with `VoteDuplicate`, checked before the
    /// transition table is even consulted — a repeat of the same vote is
    /// never treated as a (legal or illegal) transition.
    fn check_transition(from: VoteType, to: VoteType) -> Result<(), OperationError> {
        if from == to {
            return Err(OperationError::Domain(VoteError::VoteDuplicate));
        }
        if !VoteType::transition_allowed(from, to) {
            return Err(OperationError::Domain(VoteError::WrongVote { from, to }));
        }
        Ok(())
    }

    /// Casts or escalates `vote_id.active_user_id`'s vote to `vote_type`.
    /// Bumps yes/no counters only on a polarity-class transition (old vote
    /// was not positive/negative, new one is), so a second `Yes` after an
    /// already-positive `Crush` would change nothing.
    pub async fn add_user_vote(
        &self,
        vote_id: VoteId,
        vote_type: VoteType,
        voted_at: DateTime<Utc>,
    ) -> Result<Romance, OperationError> {
        let mut tries = 0;
        loop {
            let romance = self.romances.get_romance(vote_id).await?;
            let old = romance.vote_of(vote_id.active_user_id).unwrap_or_default();
            Self::check_transition(old.vote_type, vote_type)?;

            let old_is_not_positive = !old.vote_type.is_positive();
            let old_is_not_negative = !old.vote_type.is_negative();

            match self
                .romances
                .add_active_user_vote(&romance, vote_id.active_user_id, vote_type, voted_at)
                .await
            {
                Ok(updated) => {
                    if vote_type.is_positive() && old_is_not_positive {
                        self.incr(vote_id, VoteType::Yes, voted_at).await;
                    }
                    if vote_type.is_negative() && old_is_not_negative {
                        self.incr(vote_id, VoteType::No, voted_at).await;
                    }
                    return Ok(updated);
                }
                Err(RepoError::VersionConflict) if tries < self.version_conflict_retries => {
                    tries += 1;
                    debug!(%vote_id.active_user_id, tries, "retrying add_user_vote after version conflict");
                }
                Err(RepoError::VersionConflict) => return Err(OperationError::VersionConflict),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Escalates an existing vote to a new type, leaving `votedAt`/
    /// `createdAt` untouched. Never touches counters: counter totals
    /// reflect first-cast polarity only, not later changes.
    pub async fn change_user_vote(
        &self,
        vote_id: VoteId,
        new_vote_type: VoteType,
    ) -> Result<Romance, OperationError> {
        let mut tries = 0;
        loop {
            let romance = self.romances.get_romance(vote_id).await?;
            let old = romance.vote_of(vote_id.active_user_id).unwrap_or_default();
            Self::check_transition(old.vote_type, new_vote_type)?;

            match self
                .romances
                .change_active_user_vote_type(&romance, vote_id.active_user_id, new_vote_type)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(RepoError::VersionConflict) if tries < self.version_conflict_retries => {
                    tries += 1;
                    debug!(%vote_id.active_user_id, tries, "retrying change_user_vote after version conflict");
                }
                Err(RepoError::VersionConflict) => return Err(OperationError::VersionConflict),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Clears the active user's vote back to `Empty`. No counter change.
    pub async fn delete_user_vote(&self, vote_id: VoteId) -> Result<(), OperationError> {
        let mut tries = 0;
        loop {
            let romance = self.romances.get_romance(vote_id).await?;
            match self
                .romances
                .delete_active_user_vote(&romance, vote_id.active_user_id)
                .await
            {
                Ok(()) => return Ok(()),
                Err(RepoError::VersionConflict) if tries < self.version_conflict_retries => {
                    tries += 1;
                    debug!(%vote_id.active_user_id, tries, "retrying delete_user_vote after version conflict");
                }
                Err(RepoError::VersionConflict) => return Err(OperationError::VersionConflict),
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get_user_vote(&self, vote_id: VoteId) -> Result<Vote, OperationError> {
        let romance = self.romances.get_romance(vote_id).await?;
        Ok(romance.vote_of(vote_id.active_user_id).unwrap_or_default())
    }

    pub async fn get_romance(&self, vote_id: VoteId) -> Result<Romance, OperationError> {
        Ok(self.romances.get_romance(vote_id).await?)
    }

    pub async fn delete_romance(&self, vote_id: VoteId) -> Result<(), OperationError> {
        Ok(self.romances.delete_romance(vote_id).await?)
    }

    /// `counter_vote_type` is the counter-column selector (`Yes`/`No`), not
    /// necessarily the literal vote type just cast — a `Crush` still drives
    /// the yes-side counters. Best-effort: `CountersRepository::incr_counters`
    /// swallows its own backend errors.
    async fn incr(&self, vote_id: VoteId, counter_vote_type: VoteType, event_time: DateTime<Utc>) {
        let Ok(update) = CounterUpdateGroup::new(
            vote_id.country_id,
            vote_id.active_user_id,
            vote_id.peer_user_id,
            counter_vote_type,
            event_time,
        ) else {
            return;
        };
        self.counters.incr_counters(update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountersConfig, RomancesConfig};
    use crate::kvs::memory::InMemoryKvs;
    use uuid::Uuid;

    fn ops() -> VoteOperations {
        let kvs = Arc::new(InMemoryKvs::new());
        let romances = Arc::new(RomanceRepository::new(kvs.clone(), RomancesConfig::default()));
        let counters = Arc::new(CountersRepository::new(kvs, CountersConfig::default()));
        VoteOperations::new(romances, counters, 3)
    }

    fn vote_id() -> VoteId {
        VoteId::new(11, Uuid::new_v4(), Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn add_then_get_is_symmetric_across_sides() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        let romance = ops.add_user_vote(id, VoteType::Yes, now).await.unwrap();
        assert_eq!(romance.vote_of(id.active_user_id).unwrap().vote_type, VoteType::Yes);
        assert_eq!(romance.version, 1);

        let mirrored = ops.get_romance(id.to_peer()).await.unwrap();
        assert_eq!(mirrored.vote_of(id.peer_user_id).unwrap().vote_type, VoteType::Empty);
        assert_eq!(mirrored.peer_vote_of(id.peer_user_id).unwrap().vote_type, VoteType::Yes);
        assert_eq!(mirrored.version, 1);
    }

    #[tokio::test]
    async fn illegal_transition_from_terminal_state_is_rejected() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        ops.add_user_vote(id, VoteType::Crush, now).await.unwrap();
        let err = ops.add_user_vote(id, VoteType::Yes, now).await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::Domain(VoteError::WrongVote {
                from: VoteType::Crush,
                to: VoteType::Yes
            })
        ));

        let romance = ops.get_romance(id).await.unwrap();
        assert_eq!(romance.vote_of(id.active_user_id).unwrap().vote_type, VoteType::Crush);
    }

    #[tokio::test]
    async fn repeating_the_same_vote_is_a_duplicate() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        ops.add_user_vote(id, VoteType::No, now).await.unwrap();
        let err = ops.add_user_vote(id, VoteType::No, now).await.unwrap_err();
        assert!(matches!(err, OperationError::Domain(VoteError::VoteDuplicate)));
    }

    #[tokio::test]
    async fn no_then_yes_increments_both_counters_without_decrementing() {
        let ops = ops();
        let id = vote_id();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);

        ops.add_user_vote(id, VoteType::No, t0).await.unwrap();
        ops.add_user_vote(id, VoteType::Yes, t1).await.unwrap();

        let key = crate::domain::ActiveUserKey::new(id.country_id, id.active_user_id).unwrap();
        let lifetime = ops.counters.get_lifetime_counter(key).await;
        assert_eq!(lifetime.outgoing_no, 1);
        assert_eq!(lifetime.outgoing_yes, 1);
    }

    #[tokio::test]
    async fn change_user_vote_never_touches_counters() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        ops.add_user_vote(id, VoteType::No, now).await.unwrap();
        ops.change_user_vote(id, VoteType::Yes).await.unwrap();

        let key = crate::domain::ActiveUserKey::new(id.country_id, id.active_user_id).unwrap();
        let lifetime = ops.counters.get_lifetime_counter(key).await;
        assert_eq!(lifetime.outgoing_no, 1);
        assert_eq!(lifetime.outgoing_yes, 0);
    }

    #[tokio::test]
    async fn delete_user_vote_clears_vote_with_no_counter_change() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        ops.add_user_vote(id, VoteType::Yes, now).await.unwrap();
        ops.delete_user_vote(id).await.unwrap();

        let vote = ops.get_user_vote(id).await.unwrap();
        assert_eq!(vote.vote_type, VoteType::Empty);
        assert_eq!(vote.voted_at, None);

        let key = crate::domain::ActiveUserKey::new(id.country_id, id.active_user_id).unwrap();
        let lifetime = ops.counters.get_lifetime_counter(key).await;
        assert_eq!(lifetime.outgoing_yes, 1);
    }

    #[tokio::test]
    async fn delete_romance_removes_both_sides() {
        let ops = ops();
        let id = vote_id();
        let now = Utc::now();

        ops.add_user_vote(id, VoteType::Yes, now).await.unwrap();
        ops.delete_romance(id).await.unwrap();

        let romance = ops.get_romance(id).await.unwrap();
        assert!(romance.is_empty());
        assert_eq!(romance.version, 0);
    }
}
