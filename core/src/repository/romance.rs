//! Persists the bidirectional [`Romance`] row and answers peer enumeration
//! queries, grounded in `original_source`'s
//! `infrastructure/persistence/romances_repository.go`: same attribute
//! names (`a`/`b`/`e`/`g`/`h`/`i`/`l`/`n`/`o`/`p`/`v`), same
//! `attribute_not_exists`-then-`version`-equality condition ladder, same
//! two-pass (base table, then `gsiByMaxMinUser`) peer scan.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RepoError;
use crate::config::RomancesConfig;
use crate::domain::{Romance, Vote, VoteError, VoteId, VoteType};
use crate::kvs::{AttrValue, Condition, Index, Item, ItemKey, Kvs, Table};

const PK_ATTR: &str = "a";
const SK_ATTR: &str = "b";
const PK_VOTE_TYPE: &str = "e";
const PK_VOTED_AT: &str = "g";
const PK_CREATED_AT: &str = "h";
const PK_UPDATED_AT: &str = "i";
const SK_VOTE_TYPE: &str = "l";
const SK_VOTED_AT: &str = "n";
const SK_CREATED_AT: &str = "o";
const SK_UPDATED_AT: &str = "p";
const VERSION_ATTR: &str = "v";
const TTL_ATTR: &str = "ttl";

struct SideAttrs {
    vote_type: &'static str,
    voted_at: &'static str,
    created_at: &'static str,
    updated_at: &'static str,
}

const PK_SIDE: SideAttrs = SideAttrs {
    vote_type: PK_VOTE_TYPE,
    voted_at: PK_VOTED_AT,
    created_at: PK_CREATED_AT,
    updated_at: PK_UPDATED_AT,
};
const SK_SIDE: SideAttrs = SideAttrs {
    vote_type: SK_VOTE_TYPE,
    voted_at: SK_VOTED_AT,
    created_at: SK_CREATED_AT,
    updated_at: SK_UPDATED_AT,
};

fn unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_unix(v: Option<&AttrValue>) -> Option<DateTime<Utc>> {
    match v {
        Some(AttrValue::N(n)) => Utc.timestamp_opt(*n, 0).single(),
        _ => None,
    }
}

fn as_u8(v: Option<&AttrValue>) -> u8 {
    match v {
        Some(AttrValue::N(n)) => (*n).clamp(0, u8::MAX as i64) as u8,
        _ => 0,
    }
}

fn as_u32(v: Option<&AttrValue>) -> u32 {
    match v {
        Some(AttrValue::N(n)) => (*n).max(0) as u32,
        _ => 0,
    }
}

fn row_key(pk: Uuid, sk: Uuid) -> ItemKey {
    ItemKey::new(AttrValue::U(pk), AttrValue::U(sk))
}

pub struct RomanceRepository {
    kvs: Arc<dyn Kvs>,
    config: RomancesConfig,
}

impl RomanceRepository {
    pub fn new(kvs: Arc<dyn Kvs>, config: RomancesConfig) -> Self {
        Self { kvs, config }
    }

    fn ttl_for(&self, active_vote: VoteType, peer_vote: VoteType) -> i64 {
        if active_vote.is_negative() || peer_vote.is_negative() {
            self.config.dead_romance_ttl_seconds
        } else if active_vote.is_positive() && peer_vote.is_positive() {
            self.config.mutual_romance_ttl_seconds
        } else {
            self.config.non_mutual_romance_ttl_seconds
        }
    }

    fn item_to_romance(item: &Item, pk: Uuid, sk: Uuid) -> Romance {
        let version = as_u32(item.get(VERSION_ATTR));
        let pk_vote = Vote {
            vote_type: VoteType::from_u8(as_u8(item.get(PK_VOTE_TYPE))).unwrap_or(VoteType::Empty),
            voted_at: from_unix(item.get(PK_VOTED_AT)),
            created_at: from_unix(item.get(PK_CREATED_AT)),
            updated_at: from_unix(item.get(PK_UPDATED_AT)),
        };
        let sk_vote = Vote {
            vote_type: VoteType::from_u8(as_u8(item.get(SK_VOTE_TYPE))).unwrap_or(VoteType::Empty),
            voted_at: from_unix(item.get(SK_VOTED_AT)),
            created_at: from_unix(item.get(SK_CREATED_AT)),
            updated_at: from_unix(item.get(SK_UPDATED_AT)),
        };
        Romance {
            pk,
            sk,
            version,
            pk_vote,
            sk_vote,
        }
    }

    /// Consistent read; a missing row is a synthesized empty romance at
    /// version 0, not an error.
    pub async fn get_romance(&self, vote_id: VoteId) -> Result<Romance, RepoError> {
        let (pk, sk) = vote_id.canonical_pair();
        let key = row_key(pk, sk);
        let item = self.kvs.get_item(Table::Romances, &key).await?;
        let romance = match item {
            Some(item) => Self::item_to_romance(&item, pk, sk),
            None => Romance::empty(pk, sk),
        };
        debug!(pk = %pk, sk = %sk, version = romance.version, "loaded romance");
        Ok(romance)
    }

    fn side_for(romance: &Romance, active_user_id: Uuid) -> &'static SideAttrs {
        if active_user_id == romance.pk {
            &PK_SIDE
        } else {
            &SK_SIDE
        }
    }

    /// First vote on the pair: `attribute_not_exists` when `version == 0`,
    /// otherwise CAS on `version`. Returns the refreshed romance.
    pub async fn add_active_user_vote(
        &self,
        romance: &Romance,
        active_user_id: Uuid,
        vote_type: VoteType,
        voted_at: DateTime<Utc>,
    ) -> Result<Romance, RepoError> {
        let now = Utc::now();
        let side = Self::side_for(romance, active_user_id);
        let peer_vote = romance.peer_vote_of(active_user_id).unwrap_or_default();
        let ttl = unix(now) + self.ttl_for(vote_type, peer_vote.vote_type);

        let mut sets = Item::new();
        sets.insert(PK_ATTR.to_string(), AttrValue::U(romance.pk));
        sets.insert(SK_ATTR.to_string(), AttrValue::U(romance.sk));
        sets.insert(side.vote_type.to_string(), AttrValue::N(vote_type as i64));
        sets.insert(side.voted_at.to_string(), AttrValue::N(unix(voted_at)));
        sets.insert(side.created_at.to_string(), AttrValue::N(unix(now)));
        sets.insert(VERSION_ATTR.to_string(), AttrValue::N(romance.version as i64 + 1));
        sets.insert(TTL_ATTR.to_string(), AttrValue::N(ttl));

        let condition = if romance.version == 0 {
            Condition::AttributeNotExists(PK_ATTR)
        } else {
            Condition::AttributeEquals(VERSION_ATTR, romance.version as i64)
        };

        let key = row_key(romance.pk, romance.sk);
        let updated = self
            .kvs
            .put_or_update(Table::Romances, &key, condition, sets)
            .await?;
        debug!(pk = %romance.pk, sk = %romance.sk, vote = %vote_type, "added active user vote");
        Ok(Self::item_to_romance(&updated, romance.pk, romance.sk))
    }

    /// Refuses if the active side is currently `Empty` or `newVoteType` is
    /// `Empty`; otherwise CAS-updates only `voteType`/`updatedAt` on the
    /// active side, leaving `votedAt`/`createdAt` untouched.
    pub async fn change_active_user_vote_type(
        &self,
        romance: &Romance,
        active_user_id: Uuid,
        new_vote_type: VoteType,
    ) -> Result<Romance, RepoError> {
        let active = romance.vote_of(active_user_id).unwrap_or_default();
        if active.vote_type == VoteType::Empty {
            return Err(RepoError::Domain(VoteError::VoteNotFound));
        }
        if new_vote_type == VoteType::Empty {
            return Err(RepoError::Domain(VoteError::WrongVote {
                from: active.vote_type,
                to: new_vote_type,
            }));
        }

        let now = Utc::now();
        let side = Self::side_for(romance, active_user_id);
        let peer_vote = romance.peer_vote_of(active_user_id).unwrap_or_default();
        let ttl = unix(now) + self.ttl_for(new_vote_type, peer_vote.vote_type);

        let mut sets = Item::new();
        sets.insert(side.vote_type.to_string(), AttrValue::N(new_vote_type as i64));
        sets.insert(side.updated_at.to_string(), AttrValue::N(unix(now)));
        sets.insert(VERSION_ATTR.to_string(), AttrValue::N(romance.version as i64 + 1));
        sets.insert(TTL_ATTR.to_string(), AttrValue::N(ttl));

        let key = row_key(romance.pk, romance.sk);
        let updated = self
            .kvs
            .put_or_update(
                Table::Romances,
                &key,
                Condition::AttributeEquals(VERSION_ATTR, romance.version as i64),
                sets,
            )
            .await?;
        debug!(pk = %romance.pk, sk = %romance.sk, vote = %new_vote_type, "changed active user vote");
        Ok(Self::item_to_romance(&updated, romance.pk, romance.sk))
    }

    /// No-op if both sides are already empty. Otherwise removes the active
    /// side's vote attributes entirely (voteType/votedAt/createdAt/updatedAt),
    /// leaving the peer side intact.
    pub async fn delete_active_user_vote(
        &self,
        romance: &Romance,
        active_user_id: Uuid,
    ) -> Result<(), RepoError> {
        if romance.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let side = Self::side_for(romance, active_user_id);
        let peer_vote = romance.peer_vote_of(active_user_id).unwrap_or_default();
        let ttl = unix(now) + self.ttl_for(VoteType::Empty, peer_vote.vote_type);

        let mut sets = Item::new();
        sets.insert(side.vote_type.to_string(), AttrValue::N(VoteType::Empty as i64));
        sets.insert(side.voted_at.to_string(), AttrValue::Null);
        sets.insert(side.created_at.to_string(), AttrValue::Null);
        sets.insert(side.updated_at.to_string(), AttrValue::Null);
        sets.insert(VERSION_ATTR.to_string(), AttrValue::N(romance.version as i64 + 1));
        sets.insert(TTL_ATTR.to_string(), AttrValue::N(ttl));

        let key = row_key(romance.pk, romance.sk);
        self.kvs
            .put_or_update(
                Table::Romances,
                &key,
                Condition::AttributeEquals(VERSION_ATTR, romance.version as i64),
                sets,
            )
            .await?;
        debug!(pk = %romance.pk, sk = %romance.sk, "deleted active user vote");
        Ok(())
    }

    /// Unconditional point-delete of the row under the canonical key.
    pub async fn delete_romance(&self, vote_id: VoteId) -> Result<(), RepoError> {
        let (pk, sk) = vote_id.canonical_pair();
        self.kvs.delete_item(Table::Romances, &row_key(pk, sk)).await?;
        debug!(pk = %pk, sk = %sk, "deleted romance");
        Ok(())
    }

    /// Buffers deletes into pages no larger than the backend batch limit
    /// and flushes each full page plus a final partial page. Fails on the
    /// first backend error, with no partial-success reporting.
    pub async fn delete_romances_group(
        &self,
        country_id: u16,
        active_user_id: Uuid,
        peer_ids: &[Uuid],
    ) -> Result<(), RepoError> {
        use crate::kvs::BATCH_DELETE_LIMIT;

        for chunk in peer_ids.chunks(BATCH_DELETE_LIMIT) {
            let mut keys = Vec::with_capacity(chunk.len());
            for &peer_id in chunk {
                let vote_id = VoteId::new(country_id, active_user_id, peer_id)
                    .map_err(|e| RepoError::Backend(e.to_string()))?;
                let (pk, sk) = vote_id.canonical_pair();
                keys.push(row_key(pk, sk));
            }
            self.kvs.batch_delete(Table::Romances, keys).await?;
            debug!(count = chunk.len(), %active_user_id, "deleted romances batch");
        }
        Ok(())
    }

    /// Lazily enumerates every peer of `active_user_id`: one pass over the
    /// base table (`pk = activeUserId`), then one pass over
    /// `gsiByMaxMinUser` (`sk = activeUserId`) with its own fresh
    /// pagination cursor (the original's shared-cursor reuse across
    /// passes is a bug, not reproduced here). A clean end closes the
    /// channel with no further message; an aborted scan sends one final
    /// `Err` before closing so a caller that cares can tell the two apart.
    pub fn get_all_peers_for_active_user(
        &self,
        active_user_id: Uuid,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<Uuid, RepoError>> {
        let (tx, rx) = mpsc::channel(64);
        let kvs = self.kvs.clone();

        tokio::spawn(async move {
            for (index, partition_attr) in [(Index::Primary, PK_ATTR), (Index::GsiByMaxMinUser, SK_ATTR)] {
                let mut cursor = None;
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let page = match kvs
                        .query(Table::Romances, index, AttrValue::U(active_user_id), None, cursor.clone())
                        .await
                    {
                        Ok(page) => page,
                        Err(e) => {
                            warn!(error = %e, "peer enumeration query failed, aborting");
                            let _ = tx.send(Err(RepoError::from(e))).await;
                            return;
                        }
                    };

                    for item in &page.items {
                        let peer_attr = if partition_attr == PK_ATTR { SK_ATTR } else { PK_ATTR };
                        let peer_id = match item.get(peer_attr) {
                            Some(AttrValue::U(id)) => *id,
                            _ => continue,
                        };
                        tokio::select! {
                            res = tx.send(Ok(peer_id)) => {
                                if res.is_err() {
                                    return;
                                }
                            }
                            _ = cancel.cancelled() => return,
                        }
                    }

                    match page.cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::memory::InMemoryKvs;
    use std::collections::HashSet;

    fn repo() -> RomanceRepository {
        RomanceRepository::new(Arc::new(InMemoryKvs::new()), RomancesConfig::default())
    }

    #[tokio::test]
    async fn get_missing_romance_is_empty_at_version_zero() {
        let repo = repo();
        let vote_id = VoteId::new(1, Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let romance = repo.get_romance(vote_id).await.unwrap();
        assert_eq!(romance.version, 0);
        assert!(romance.is_empty());
    }

    #[tokio::test]
    async fn add_then_get_round_trips_vote_on_both_sides() {
        let repo = repo();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let vote_id = VoteId::new(11, a, b).unwrap();
        let romance = repo.get_romance(vote_id).await.unwrap();
        let updated = repo
            .add_active_user_vote(&romance, a, VoteType::Yes, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.vote_of(a).unwrap().vote_type, VoteType::Yes);

        let from_peer = repo.get_romance(vote_id.to_peer()).await.unwrap();
        assert_eq!(from_peer.vote_of(b).unwrap().vote_type, VoteType::Empty);
        assert_eq!(from_peer.peer_vote_of(b).unwrap().vote_type, VoteType::Yes);
    }

    #[tokio::test]
    async fn add_conflicting_version_fails() {
        let repo = repo();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let vote_id = VoteId::new(1, a, b).unwrap();
        let stale = repo.get_romance(vote_id).await.unwrap();
        repo.add_active_user_vote(&stale, a, VoteType::Yes, Utc::now())
            .await
            .unwrap();

        // Re-using the now-stale (version 0) read must conflict.
        let err = repo
            .add_active_user_vote(&stale, a, VoteType::No, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::VersionConflict));
    }

    #[tokio::test]
    async fn delete_romance_clears_both_directions() {
        let repo = repo();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let vote_id = VoteId::new(1, a, b).unwrap();
        let romance = repo.get_romance(vote_id).await.unwrap();
        repo.add_active_user_vote(&romance, a, VoteType::Yes, Utc::now())
            .await
            .unwrap();
        repo.delete_romance(vote_id).await.unwrap();

        assert!(repo.get_romance(vote_id).await.unwrap().is_empty());
        assert!(repo.get_romance(vote_id.to_peer()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_enumeration_covers_both_index_passes() {
        let repo = repo();
        let u = Uuid::new_v4();
        let mut expected = HashSet::new();
        for _ in 0..5 {
            let peer = Uuid::new_v4();
            expected.insert(peer);
            let vote_id = VoteId::new(1, u, peer).unwrap();
            let romance = repo.get_romance(vote_id).await.unwrap();
            repo.add_active_user_vote(&romance, u, VoteType::Yes, Utc::now())
                .await
                .unwrap();
        }

        let mut rx = repo.get_all_peers_for_active_user(u, CancellationToken::new());
        let mut got = HashSet::new();
        while let Some(res) = rx.recv().await {
            got.insert(res.unwrap());
        }
        assert_eq!(got, expected);
    }
}
