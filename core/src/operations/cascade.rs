//! The cascading "delete every romance of user U" pipeline (§4.4),
//! grounded in `original_source/internal/context/voting/application/operation`'s
//! `delete_romances_operation.go`/`delete_romances_group_operation.go`: a
//! request fans out to one FIFO message, a handler turns that into a
//! chunked peer scan, and a second handler turns each chunk into a batch
//! delete.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::domain::ActiveUserKey;
use crate::messaging::dispatcher::Handler;
use crate::messaging::{self, DeleteRomancesGroupMessage, DeleteRomancesMessage, Publisher};
use crate::repository::RomanceRepository;

pub struct CascadeOperations {
    romances: Arc<RomanceRepository>,
    publisher: Arc<dyn Publisher>,
    group_limit: usize,
}

impl CascadeOperations {
    pub fn new(romances: Arc<RomanceRepository>, publisher: Arc<dyn Publisher>, group_limit: usize) -> Self {
        Self {
            romances,
            publisher,
            group_limit,
        }
    }

    /// Facade entry point: publishes one request-level message and returns
    /// immediately. The actual deletion happens asynchronously, driven by
    /// [`Self::delete_romances`] on the worker side.
    pub async fn request_delete_romances(&self, key: ActiveUserKey) -> Result<(), messaging::MessagingError> {
        messaging::publish(
            &*self.publisher,
            messaging::DELETE_ROMANCES_TOPIC,
            DeleteRomancesMessage::new(key),
        )
        .await
    }

    /// Enumerates every peer of `key`'s user, publishing one
    /// [`DeleteRomancesGroupMessage`] per full chunk of `group_limit` peers
    /// plus a final partial chunk. A publish failure aborts the scan
    /// immediately — the remaining peers are never enumerated, and the
    /// caller is expected to let the message redeliver so the whole scan
    /// restarts from the top.
    pub async fn delete_romances(&self, key: ActiveUserKey) -> Result<(), messaging::MessagingError> {
        let cancel = CancellationToken::new();
        let mut peers = self.romances.get_all_peers_for_active_user(key.user_id, cancel.clone());

        let mut buffer = Vec::with_capacity(self.group_limit);
        while let Some(result) = peers.recv().await {
            let peer_id = match result {
                Ok(id) => id,
                Err(err) => {
                    cancel.cancel();
                    error!(error = %err, user_id = %key.user_id, "peer enumeration aborted during cascade delete");
                    return Err(messaging::MessagingError::PublishFailed(err.to_string()));
                }
            };
            buffer.push(peer_id);
            if buffer.len() == self.group_limit {
                self.publish_group(key, std::mem::take(&mut buffer)).await?;
            }
        }
        if !buffer.is_empty() {
            self.publish_group(key, buffer).await?;
        }
        Ok(())
    }

    async fn publish_group(&self, key: ActiveUserKey, peer_ids: Vec<uuid::Uuid>) -> Result<(), messaging::MessagingError> {
        let count = peer_ids.len();
        messaging::publish(
            &*self.publisher,
            messaging::DELETE_ROMANCES_GROUP_TOPIC,
            DeleteRomancesGroupMessage::new(key, peer_ids),
        )
        .await?;
        debug!(count, user_id = %key.user_id, "published delete-romances-group chunk");
        Ok(())
    }

    /// Consumes one chunk: an unconditional batch delete of every
    /// `(active_user_id, peer_id)` romance row.
    pub async fn delete_romances_group(
        &self,
        country_id: u16,
        active_user_id: uuid::Uuid,
        peer_ids: &[uuid::Uuid],
    ) -> Result<(), crate::repository::RepoError> {
        self.romances
            .delete_romances_group(country_id, active_user_id, peer_ids)
            .await
    }
}

/// Dispatcher [`Handler`] for [`messaging::DELETE_ROMANCES_TOPIC`]: turns a
/// request message into the chunked peer scan.
pub struct DeleteRomancesHandler {
    pub cascade: Arc<CascadeOperations>,
}

#[async_trait]
impl Handler for DeleteRomancesHandler {
    fn name(&self) -> &'static str {
        "delete_romances"
    }

    async fn handle(&self, body: &str) -> Option<anyhow::Result<()>> {
        let msg: DeleteRomancesMessage = messaging::try_decode(body).ok().flatten()?;
        let key = match ActiveUserKey::new(msg.country_id, msg.active_user_id) {
            Ok(key) => key,
            Err(err) => return Some(Err(err.into())),
        };
        Some(self.cascade.delete_romances(key).await.map_err(Into::into))
    }
}

/// Dispatcher [`Handler`] for [`messaging::DELETE_ROMANCES_GROUP_TOPIC`]:
/// issues the batched delete for one chunk of peers.
pub struct DeleteRomancesGroupHandler {
    pub cascade: Arc<CascadeOperations>,
}

#[async_trait]
impl Handler for DeleteRomancesGroupHandler {
    fn name(&self) -> &'static str {
        "delete_romances_group"
    }

    async fn handle(&self, body: &str) -> Option<anyhow::Result<()>> {
        let msg: DeleteRomancesGroupMessage = messaging::try_decode(body).ok().flatten()?;
        Some(
            self.cascade
                .delete_romances_group(msg.country_id, msg.active_user_id, &msg.peer_ids)
                .await
                .map_err(Into::into),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomancesConfig;
    use crate::kvs::memory::InMemoryKvs;
    use crate::messaging::memory::InMemoryBroker;
    use uuid::Uuid;

    fn cascade() -> (Arc<CascadeOperations>, Arc<InMemoryBroker>, Arc<RomanceRepository>) {
        let kvs = Arc::new(InMemoryKvs::new());
        let romances = Arc::new(RomanceRepository::new(kvs, RomancesConfig::default()));
        let broker = Arc::new(InMemoryBroker::new());
        let cascade = Arc::new(CascadeOperations::new(romances.clone(), broker.clone(), 25));
        (cascade, broker, romances)
    }

    async fn seed_peers(romances: &RomanceRepository, user_id: Uuid, count: usize) {
        for _ in 0..count {
            let peer = Uuid::new_v4();
            let vote_id = crate::domain::VoteId::new(1, user_id, peer).unwrap();
            let romance = romances.get_romance(vote_id).await.unwrap();
            romances
                .add_active_user_vote(&romance, user_id, crate::domain::VoteType::Yes, chrono::Utc::now())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn thirty_peers_publish_two_chunks_of_twenty_five_and_five() {
        let (cascade, broker, romances) = cascade();
        let user_id = Uuid::new_v4();
        seed_peers(&romances, user_id, 30).await;
        let key = ActiveUserKey::new(1, user_id).unwrap();

        cascade.delete_romances(key).await.unwrap();

        let mut sizes = Vec::new();
        let mut all_peers = std::collections::HashSet::new();
        while let Some(received) = broker.receive(messaging::DELETE_ROMANCES_GROUP_TOPIC).await.unwrap() {
            let decoded: DeleteRomancesGroupMessage = messaging::decode(&received.body).unwrap();
            sizes.push(decoded.peer_ids.len());
            all_peers.extend(decoded.peer_ids);
        }

        assert_eq!(sizes, vec![25, 5]);
        assert_eq!(all_peers.len(), 30);
    }

    #[tokio::test]
    async fn request_publishes_one_request_message() {
        let (cascade, broker, _romances) = cascade();
        let key = ActiveUserKey::new(1, Uuid::new_v4()).unwrap();
        cascade.request_delete_romances(key).await.unwrap();

        let received = broker.receive(messaging::DELETE_ROMANCES_TOPIC).await.unwrap();
        assert!(received.is_some());
        assert!(broker.receive(messaging::DELETE_ROMANCES_TOPIC).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_handler_deletes_the_batch() {
        let (cascade, _broker, romances) = cascade();
        let user_id = Uuid::new_v4();
        seed_peers(&romances, user_id, 3).await;
        let key = ActiveUserKey::new(1, user_id).unwrap();

        let mut peer_ids = Vec::new();
        let mut rx = romances.get_all_peers_for_active_user(user_id, CancellationToken::new());
        while let Some(res) = rx.recv().await {
            peer_ids.push(res.unwrap());
        }

        let handler = DeleteRomancesGroupHandler { cascade: cascade.clone() };
        let body = messaging::encode(DeleteRomancesGroupMessage::new(key, peer_ids.clone())).unwrap();
        handler.handle(&body).await.unwrap().unwrap();

        let mut rx = romances.get_all_peers_for_active_user(user_id, CancellationToken::new());
        assert!(rx.recv().await.is_none());
    }
}
