//! Application service facade (§4.5), grounded in
//! `original_source/internal/context/voting/application/voting_service.go`:
//! a single struct holding one field per operation. Each public method
//! validates/constructs the domain value object the underlying operation
//! needs, then delegates straight through — no business logic of its own
//! lives here, that all sits in [`crate::operations`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ActiveUserKey, CountersGroup, HourlyCounters, HoursOffsetGroups, Romance, Vote, VoteError, VoteId, VoteType};
use crate::operations::{CascadeOperations, OperationError, VoteOperations};
use crate::repository::CountersRepository;

/// Commands the facade accepts, matching the REST surface's five mutating
/// endpoints (§6) — listed here for implementer context even though the
/// REST adapter itself is out of scope.
#[derive(Debug, Clone)]
pub enum Command {
    VoteAdd { vote_id: VoteId, vote_type: VoteType, voted_at: DateTime<Utc> },
    ChangeVoteType { vote_id: VoteId, new_vote_type: VoteType },
    DeleteVote { vote_id: VoteId },
    DeleteRomance { vote_id: VoteId },
    DeleteRomances { key: ActiveUserKey },
}

pub struct VotingService {
    votes: Arc<VoteOperations>,
    counters: Arc<CountersRepository>,
    cascade: Arc<CascadeOperations>,
}

impl VotingService {
    pub fn new(votes: Arc<VoteOperations>, counters: Arc<CountersRepository>, cascade: Arc<CascadeOperations>) -> Self {
        Self {
            votes,
            counters,
            cascade,
        }
    }

    pub async fn add_user_vote(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
        vote_type: VoteType,
        voted_at: DateTime<Utc>,
    ) -> Result<Romance, OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.add_user_vote(vote_id, vote_type, voted_at).await
    }

    pub async fn change_user_vote(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
        new_vote_type: VoteType,
    ) -> Result<Romance, OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.change_user_vote(vote_id, new_vote_type).await
    }

    pub async fn delete_user_vote(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
    ) -> Result<(), OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.delete_user_vote(vote_id).await
    }

    pub async fn get_user_vote(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
    ) -> Result<Vote, OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.get_user_vote(vote_id).await
    }

    pub async fn get_romance(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
    ) -> Result<Romance, OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.get_romance(vote_id).await
    }

    pub async fn delete_romance(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
    ) -> Result<(), OperationError> {
        let vote_id = VoteId::new(country_id, active_user_id, peer_user_id)?;
        self.votes.delete_romance(vote_id).await
    }

    pub async fn get_lifetime_counters(&self, country_id: u16, active_user_id: Uuid) -> Result<CountersGroup, VoteError> {
        let key = ActiveUserKey::new(country_id, active_user_id)?;
        Ok(self.counters.get_lifetime_counter(key).await)
    }

    pub async fn get_hourly_counters(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        hours_offsets: impl IntoIterator<Item = u32>,
    ) -> Result<HourlyCounters, VoteError> {
        let key = ActiveUserKey::new(country_id, active_user_id)?;
        let offsets = HoursOffsetGroups::new(hours_offsets)?;
        Ok(self.counters.get_hourly_counters(key, &offsets).await)
    }

    /// Publishes the cascade-delete request; the actual deletion is
    /// performed asynchronously by the worker (§4.4).
    pub async fn delete_romances(&self, country_id: u16, active_user_id: Uuid) -> Result<(), OperationError> {
        let key = ActiveUserKey::new(country_id, active_user_id)?;
        self.cascade
            .request_delete_romances(key)
            .await
            .map_err(|e| OperationError::Backend(e.to_string()))
    }

    /// Dispatches a validated [`Command`] to the matching operation. The
    /// return value is intentionally untyped relative to the command
    /// variant (`Romance`, `()`, ...); an adapter that needs a uniform
    /// response shape maps each arm to its own wire type itself.
    pub async fn dispatch(&self, command: Command) -> Result<Option<Romance>, OperationError> {
        match command {
            Command::VoteAdd { vote_id, vote_type, voted_at } => {
                Ok(Some(self.votes.add_user_vote(vote_id, vote_type, voted_at).await?))
            }
            Command::ChangeVoteType { vote_id, new_vote_type } => {
                Ok(Some(self.votes.change_user_vote(vote_id, new_vote_type).await?))
            }
            Command::DeleteVote { vote_id } => {
                self.votes.delete_user_vote(vote_id).await?;
                Ok(None)
            }
            Command::DeleteRomance { vote_id } => {
                self.votes.delete_romance(vote_id).await?;
                Ok(None)
            }
            Command::DeleteRomances { key } => {
                self.cascade
                    .request_delete_romances(key)
                    .await
                    .map_err(|e| OperationError::Backend(e.to_string()))?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountersConfig, RomancesConfig};
    use crate::kvs::memory::InMemoryKvs;
    use crate::messaging::memory::InMemoryBroker;
    use crate::repository::RomanceRepository;

    fn service() -> VotingService {
        let kvs = Arc::new(InMemoryKvs::new());
        let romances = Arc::new(RomanceRepository::new(kvs.clone(), RomancesConfig::default()));
        let counters = Arc::new(CountersRepository::new(kvs, CountersConfig::default()));
        let votes = Arc::new(VoteOperations::new(romances.clone(), counters.clone(), 3));
        let broker = Arc::new(InMemoryBroker::new());
        let cascade = Arc::new(CascadeOperations::new(romances, broker, 25));
        VotingService::new(votes, counters, cascade)
    }

    #[tokio::test]
    async fn add_then_get_round_trips_through_the_facade() {
        let svc = service();
        let country = 11;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let romance = svc.add_user_vote(country, a, b, VoteType::Yes, Utc::now()).await.unwrap();
        assert_eq!(romance.vote_of(a).unwrap().vote_type, VoteType::Yes);

        let vote = svc.get_user_vote(country, a, b).await.unwrap();
        assert_eq!(vote.vote_type, VoteType::Yes);
    }

    #[tokio::test]
    async fn dispatch_routes_commands_to_the_same_operations() {
        let svc = service();
        let vote_id = VoteId::new(1, Uuid::new_v4(), Uuid::new_v4()).unwrap();

        let result = svc
            .dispatch(Command::VoteAdd {
                vote_id,
                vote_type: VoteType::No,
                voted_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(result.is_some());

        svc.dispatch(Command::DeleteVote { vote_id }).await.unwrap();
        let vote = svc.get_user_vote(1, vote_id.active_user_id, vote_id.peer_user_id).await.unwrap();
        assert_eq!(vote.vote_type, VoteType::Empty);
    }

    #[tokio::test]
    async fn invalid_ids_surface_as_validation_errors() {
        let svc = service();
        let err = svc
            .add_user_vote(0, Uuid::new_v4(), Uuid::new_v4(), VoteType::Yes, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Domain(VoteError::Validation(_))));
    }
}
