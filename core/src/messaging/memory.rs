//! Deterministic in-process FIFO broker for tests and local runs, backed by
//! a [`DashMap`] of per-topic queues the same way [`crate::kvs::memory`]
//! keeps one flat map for its rows.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{MessagingError, Publisher, ReceivedMessage, Subscriber};

struct QueuedMessage {
    id: String,
    body: String,
}

#[derive(Default)]
struct TopicState {
    pending: VecDeque<QueuedMessage>,
    in_flight: HashMap<String, QueuedMessage>,
    seen_dedup_ids: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    topics: DashMap<&'static str, Mutex<TopicState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish_raw(
        &self,
        topic: &'static str,
        _group_id: String,
        deduplication_id: String,
        body: String,
    ) -> Result<(), MessagingError> {
        let entry = self.topics.entry(topic).or_default();
        let mut state = entry.lock().expect("topic mutex poisoned");
        if !state.seen_dedup_ids.insert(deduplication_id) {
            return Ok(());
        }
        state.pending.push_back(QueuedMessage {
            id: Uuid::new_v4().to_string(),
            body,
        });
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn receive(&self, topic: &'static str) -> Result<Option<ReceivedMessage>, MessagingError> {
        let entry = self.topics.entry(topic).or_default();
        let mut state = entry.lock().expect("topic mutex poisoned");
        let Some(msg) = state.pending.pop_front() else {
            return Ok(None);
        };
        let received = ReceivedMessage {
            id: msg.id.clone(),
            body: msg.body.clone(),
        };
        state.in_flight.insert(msg.id.clone(), msg);
        Ok(Some(received))
    }

    async fn ack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError> {
        let entry = self.topics.entry(topic).or_default();
        let mut state = entry.lock().expect("topic mutex poisoned");
        state.in_flight.remove(id);
        Ok(())
    }

    async fn nack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError> {
        let entry = self.topics.entry(topic).or_default();
        let mut state = entry.lock().expect("topic mutex poisoned");
        if let Some(msg) = state.in_flight.remove(id) {
            state.pending.push_back(msg);
        }
        Ok(())
    }
}
