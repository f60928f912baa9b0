use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::vote::Vote;
use super::vote_type::VoteType;

/// The bidirectional vote aggregate for one pair of users. `pk`/`sk` are the
/// canonical, order-independent storage key (`pk` is always the
/// lexicographically smaller uuid). `pk_vote` is the vote cast by `pk`
/// against `sk`; `sk_vote` is the vote cast by `sk` against `pk`. Which side
/// a given caller is on is resolved dynamically by comparing their user id
/// to `pk` — there is no separate "requester" row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Romance {
    pub pk: Uuid,
    pub sk: Uuid,
    pub version: u32,
    pub pk_vote: Vote,
    pub sk_vote: Vote,
}

impl Romance {
    /// A synthesized empty romance for a pair that has no row yet, version 0
    /// — exactly what `GetRomance` returns for a missing item.
    pub fn empty(pk: Uuid, sk: Uuid) -> Self {
        debug_assert!(pk < sk, "pk must be the smaller uuid of the pair");
        Self {
            pk,
            sk,
            version: 0,
            pk_vote: Vote::empty(),
            sk_vote: Vote::empty(),
        }
    }

    fn is_partition_key(&self, user_id: Uuid) -> bool {
        user_id == self.pk
    }

    /// The vote cast *by* `user_id`, or `None` if `user_id` is not a party
    /// to this romance.
    pub fn vote_of(&self, user_id: Uuid) -> Option<Vote> {
        if self.is_partition_key(user_id) {
            Some(self.pk_vote)
        } else if user_id == self.sk {
            Some(self.sk_vote)
        } else {
            None
        }
    }

    /// The vote cast *against* `user_id` by the other party.
    pub fn peer_vote_of(&self, user_id: Uuid) -> Option<Vote> {
        if self.is_partition_key(user_id) {
            Some(self.sk_vote)
        } else if user_id == self.sk {
            Some(self.pk_vote)
        } else {
            None
        }
    }

    pub fn other_user(&self, user_id: Uuid) -> Option<Uuid> {
        if self.is_partition_key(user_id) {
            Some(self.sk)
        } else if user_id == self.sk {
            Some(self.pk)
        } else {
            None
        }
    }

    /// Overwrites the vote cast by `user_id` with a fresh vote + votedAt +
    /// createdAt, leaving `updated_at` unset — the shape
    /// `AddActiveUserVoteToRomance` writes. Caller is responsible for
    /// transition validation; this is a pure data mutation.
    pub fn set_new_vote_of(
        &mut self,
        user_id: Uuid,
        vote_type: VoteType,
        voted_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.write_vote(
            user_id,
            Vote {
                vote_type,
                voted_at: Some(voted_at),
                created_at: Some(now),
                updated_at: None,
            },
        );
    }

    /// Changes only the vote type + `updated_at` of the side belonging to
    /// `user_id`, leaving `voted_at`/`created_at` untouched — the shape
    /// `ChangeActiveUserVoteTypeInRomance` writes.
    pub fn change_vote_type_of(&mut self, user_id: Uuid, vote_type: VoteType, now: DateTime<Utc>) {
        let mut vote = self.vote_of(user_id).unwrap_or_default();
        vote.vote_type = vote_type;
        vote.updated_at = Some(now);
        self.write_vote(user_id, vote);
    }

    /// Clears the vote cast by `user_id` back to `Empty` with no
    /// timestamps — the shape `DeleteActiveUserVoteFromRomance` writes (a
    /// `REMOVE` of every vote attribute on that side).
    pub fn clear_vote_of(&mut self, user_id: Uuid) {
        self.write_vote(user_id, Vote::empty());
    }

    fn write_vote(&mut self, user_id: Uuid, vote: Vote) {
        if self.is_partition_key(user_id) {
            self.pk_vote = vote;
        } else if user_id == self.sk {
            self.sk_vote = vote;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pk_vote.vote_type == VoteType::Empty && self.sk_vote.vote_type == VoteType::Empty
    }
}
