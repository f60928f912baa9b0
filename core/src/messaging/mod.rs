//! FIFO publish/subscribe port modeled on the original's SNS-FIFO/SQS-FIFO
//! pairing (`original_source/internal/shared/messaging`): every message
//! carries a group id (orders deletes for the same user) and a
//! deduplication id (collapses retried publishes), wrapped in a
//! `{"name": ..., "message": ...}` envelope so a receiver can tell what it
//! got before committing to a concrete type.

pub mod dispatcher;
pub mod memory;
pub mod postgres;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ActiveUserKey;

pub const DELETE_ROMANCES_TOPIC: &str = "delete-romances.fifo";
pub const DELETE_ROMANCES_GROUP_TOPIC: &str = "delete-romances-group.fifo";

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("ack failed: {0}")]
    AckFailed(String),
}

/// A typed FIFO message. `NAME` is the envelope discriminant a receiver
/// checks before trusting the payload shape.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
    fn group_id(&self) -> String;
    fn deduplication_id(&self) -> String;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    name: &'a str,
    message: T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    name: String,
    message: serde_json::Value,
}

pub fn encode<T: Message>(message: T) -> Result<String, MessagingError> {
    let envelope = EnvelopeOut { name: T::NAME, message };
    serde_json::to_string(&envelope).map_err(|e| MessagingError::PublishFailed(e.to_string()))
}

/// Decodes `body` as `T`, refusing a payload whose envelope name doesn't
/// match — the same guard `UnmarshalMessage`'s `expectName` check performs.
pub fn decode<T: Message>(body: &str) -> Result<T, MessagingError> {
    let envelope: EnvelopeIn =
        serde_json::from_str(body).map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;
    if envelope.name != T::NAME {
        return Err(MessagingError::ReceiveFailed(format!(
            "wrong message name: have {:?}, want {:?}",
            envelope.name,
            T::NAME
        )));
    }
    serde_json::from_value(envelope.message).map_err(|e| MessagingError::ReceiveFailed(e.to_string()))
}

/// Returns `Ok(None)` when `body`'s envelope name isn't `T::NAME` — the
/// probe a dispatcher uses to find which handler a message belongs to,
/// distinct from [`decode`]'s hard failure when a caller already knows
/// which type it wants.
pub fn try_decode<T: Message>(body: &str) -> Result<Option<T>, MessagingError> {
    let envelope: EnvelopeIn =
        serde_json::from_str(body).map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;
    if envelope.name != T::NAME {
        return Ok(None);
    }
    serde_json::from_value(envelope.message)
        .map(Some)
        .map_err(|e| MessagingError::ReceiveFailed(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub body: String,
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_raw(
        &self,
        topic: &'static str,
        group_id: String,
        deduplication_id: String,
        body: String,
    ) -> Result<(), MessagingError>;
}

#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// Pulls at most one message off `topic`. `None` means the topic is
    /// currently empty, not an error.
    async fn receive(&self, topic: &'static str) -> Result<Option<ReceivedMessage>, MessagingError>;
    async fn ack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError>;
    async fn nack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError>;
}

pub async fn publish<T: Message>(
    publisher: &(dyn Publisher),
    topic: &'static str,
    message: T,
) -> Result<(), MessagingError> {
    let group_id = message.group_id();
    let deduplication_id = message.deduplication_id();
    let body = encode(message)?;
    publisher.publish_raw(topic, group_id, deduplication_id, body).await
}

const DELETE_ROMANCES_NAME: &str = "del_romances";
const DELETE_ROMANCES_GROUP_NAME: &str = "del_romances_group";

/// Tells the worker to enumerate and delete every romance for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRomancesMessage {
    pub active_user_id: Uuid,
    pub country_id: u16,
}

impl DeleteRomancesMessage {
    pub fn new(key: ActiveUserKey) -> Self {
        Self {
            active_user_id: key.user_id,
            country_id: key.country_id,
        }
    }
}

impl Message for DeleteRomancesMessage {
    const NAME: &'static str = DELETE_ROMANCES_NAME;

    /// Per §4.4, the group id is the message *type* name, not a per-user
    /// value — it exists to order all messages of this type against each
    /// other on the broker, not to serialize one user's messages against
    /// another's.
    fn group_id(&self) -> String {
        "DeleteRomancesMessage".to_string()
    }

    fn deduplication_id(&self) -> String {
        format!("{}_{}", self.active_user_id, self.country_id)
    }
}

/// One chunk (at most [`crate::config::GROUP_DELETE_LIMIT`] peers) of a
/// cascading delete, published per-chunk so the worker's batch-delete call
/// never exceeds the backend's batch-write limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRomancesGroupMessage {
    pub active_user_id: Uuid,
    pub country_id: u16,
    pub peer_ids: Vec<Uuid>,
}

impl DeleteRomancesGroupMessage {
    pub fn new(key: ActiveUserKey, peer_ids: Vec<Uuid>) -> Self {
        Self {
            active_user_id: key.user_id,
            country_id: key.country_id,
            peer_ids,
        }
    }
}

impl Message for DeleteRomancesGroupMessage {
    const NAME: &'static str = DELETE_ROMANCES_GROUP_NAME;

    /// See [`DeleteRomancesMessage::group_id`] — the group id is the type
    /// name, ensuring per-message-type ordering on the FIFO broker.
    fn group_id(&self) -> String {
        "DeleteRomancesGroupMessage".to_string()
    }

    /// `md5("{activeUserId}_{countryId}_[{peerIds}]")`, matching the
    /// original's `fmt.Sprintf("%s_%d_%v", ...)` over a Go slice — so that
    /// re-publishing the exact same chunk (same peers, same order)
    /// deduplicates, while a different chunking of the same peer set does
    /// not.
    fn deduplication_id(&self) -> String {
        let peers = self
            .peer_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let raw = format!("{}_{}_[{}]", self.active_user_id, self.country_id, peers);
        format!("{:x}", md5::compute(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_and_checks_name() {
        let msg = DeleteRomancesMessage {
            active_user_id: Uuid::new_v4(),
            country_id: 7,
        };
        let body = encode(msg.clone()).unwrap();
        let decoded: DeleteRomancesMessage = decode(&body).unwrap();
        assert_eq!(decoded, msg);

        let err = decode::<DeleteRomancesGroupMessage>(&body).unwrap_err();
        assert!(matches!(err, MessagingError::ReceiveFailed(_)));
    }

    #[test]
    fn try_decode_returns_none_on_name_mismatch() {
        let msg = DeleteRomancesMessage {
            active_user_id: Uuid::new_v4(),
            country_id: 1,
        };
        let body = encode(msg).unwrap();
        assert!(try_decode::<DeleteRomancesGroupMessage>(&body).unwrap().is_none());
    }

    #[test]
    fn group_message_dedup_id_is_stable_for_same_chunk() {
        let key = ActiveUserKey::new(1, Uuid::new_v4()).unwrap();
        let peers = vec![Uuid::new_v4(), Uuid::new_v4()];
        let a = DeleteRomancesGroupMessage::new(key, peers.clone());
        let b = DeleteRomancesGroupMessage::new(key, peers);
        assert_eq!(a.deduplication_id(), b.deduplication_id());
    }

    #[test]
    fn group_message_dedup_id_changes_with_peer_set() {
        let key = ActiveUserKey::new(1, Uuid::new_v4()).unwrap();
        let a = DeleteRomancesGroupMessage::new(key, vec![Uuid::new_v4()]);
        let b = DeleteRomancesGroupMessage::new(key, vec![Uuid::new_v4()]);
        assert_ne!(a.deduplication_id(), b.deduplication_id());
    }
}
