use uuid::Uuid;

use super::error::VoteError;

/// Identifies one directed vote: the user casting it, the user it targets,
/// and the country the vote happened in (countries shard the underlying
/// storage region in the original system; kept here purely as a validated
/// field, not used to pick a backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoteId {
    pub country_id: u16,
    pub active_user_id: Uuid,
    pub peer_user_id: Uuid,
}

impl VoteId {
    pub fn new(country_id: u16, active_user_id: Uuid, peer_user_id: Uuid) -> Result<Self, VoteError> {
        if country_id == 0 {
            return Err(VoteError::Validation("countryId must not be zero".into()));
        }
        if active_user_id.is_nil() {
            return Err(VoteError::Validation("activeUserId must not be nil".into()));
        }
        if peer_user_id.is_nil() {
            return Err(VoteError::Validation("peerUserId must not be nil".into()));
        }
        if active_user_id == peer_user_id {
            return Err(VoteError::Validation(
                "activeUserId and peerUserId must differ".into(),
            ));
        }
        Ok(Self {
            country_id,
            active_user_id,
            peer_user_id,
        })
    }

    /// The canonical, order-independent storage key for the pair: the
    /// lexicographically smaller id is always the partition key.
    pub fn canonical_pair(&self) -> (Uuid, Uuid) {
        if self.active_user_id < self.peer_user_id {
            (self.active_user_id, self.peer_user_id)
        } else {
            (self.peer_user_id, self.active_user_id)
        }
    }

    /// Swaps active/peer while keeping `country_id` — the mirror vote on
    /// the same romance.
    pub fn to_peer(&self) -> Self {
        Self {
            country_id: self.country_id,
            active_user_id: self.peer_user_id,
            peer_user_id: self.active_user_id,
        }
    }
}
