use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::VoteError;
use super::vote_type::VoteType;

/// Describes one vote event that should move the per-user counters:
/// `active_user_id` cast `vote_type` against `peer_user_id` at `event_time`.
/// Only `Yes` and `No` votes produce a counter update — `Crush` and
/// `Compliment` are terminal reactions, not funnel events, and are never
/// passed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdateGroup {
    pub country_id: u16,
    pub active_user_id: Uuid,
    pub peer_user_id: Uuid,
    pub vote_type: VoteType,
    pub event_time: DateTime<Utc>,
}

impl CounterUpdateGroup {
    pub fn new(
        country_id: u16,
        active_user_id: Uuid,
        peer_user_id: Uuid,
        vote_type: VoteType,
        event_time: DateTime<Utc>,
    ) -> Result<Self, VoteError> {
        if event_time == DateTime::<Utc>::default() {
            return Err(VoteError::Validation("eventTime must not be zero".into()));
        }
        if !matches!(vote_type, VoteType::Yes | VoteType::No) {
            return Err(VoteError::Validation(
                "counter updates are only produced for yes/no votes".into(),
            ));
        }
        Ok(Self {
            country_id,
            active_user_id,
            peer_user_id,
            vote_type,
            event_time,
        })
    }
}
