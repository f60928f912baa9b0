use chrono::{DateTime, Utc};

use super::vote_type::VoteType;

/// One directed vote, as held inside a [`super::romance::Romance`] row.
/// `voted_at`/`created_at`/`updated_at` are all absent on an empty vote;
/// `AddActiveUserVoteToRomance` sets `voted_at`/`created_at` but not
/// `updated_at` (that one only moves on a `ChangeActiveUserVoteTypeInRomance`
/// call), matching the original's `entity.Vote` pointer-typed timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub vote_type: VoteType,
    pub voted_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Vote {
    pub fn empty() -> Self {
        Self {
            vote_type: VoteType::Empty,
            voted_at: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Default for Vote {
    fn default() -> Self {
        Self::empty()
    }
}
