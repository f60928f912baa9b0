//! Per-user counter rows, grounded in `original_source`'s
//! `infrastructure/persistence/counters_repository.go`: each vote event
//! bumps four rows in one atomic batch (the active user's hourly bucket,
//! the active user's lifetime total, the peer's hourly bucket, the peer's
//! lifetime total), and hourly reads are cumulative sliding windows, not
//! single-hour snapshots.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::config::CountersConfig;
use crate::domain::{ActiveUserKey, CounterUpdateGroup, CountersGroup, HourlyCounters, HoursOffsetGroups, VoteType};
use crate::kvs::{AttrValue, IncrWrite, Index, Item, ItemKey, Kvs, Table};

const LIFETIME_BUCKET: i64 = 0;

const INCOMING_YES_ATTR: &str = "iy";
const INCOMING_NO_ATTR: &str = "in";
const OUTGOING_YES_ATTR: &str = "oy";
const OUTGOING_NO_ATTR: &str = "on";
const HOUR_ATTR: &str = "h";

/// `hourStart`: the unix timestamp of the top of the hour `epoch_seconds`
/// falls in. This is both the sort key hourly rows live under and the base
/// the row's TTL is computed from.
fn hour_start(epoch_seconds: i64) -> i64 {
    epoch_seconds - epoch_seconds.rem_euclid(3600)
}

fn item_to_group(item: &Item) -> CountersGroup {
    let attr = |name: &str| match item.get(name) {
        Some(AttrValue::N(n)) => (*n).max(0) as u32,
        _ => 0,
    };
    CountersGroup {
        incoming_yes: attr(INCOMING_YES_ATTR),
        incoming_no: attr(INCOMING_NO_ATTR),
        outgoing_yes: attr(OUTGOING_YES_ATTR),
        outgoing_no: attr(OUTGOING_NO_ATTR),
    }
}

pub struct CountersRepository {
    kvs: Arc<dyn Kvs>,
    config: CountersConfig,
}

impl CountersRepository {
    pub fn new(kvs: Arc<dyn Kvs>, config: CountersConfig) -> Self {
        Self { kvs, config }
    }

    fn key(user_id: uuid::Uuid, bucket: i64) -> ItemKey {
        ItemKey::new(AttrValue::U(user_id), AttrValue::N(bucket))
    }

    /// Bumps the four rows a vote event touches. Counters are best-effort:
    /// a backend failure here is logged and swallowed, never propagated to
    /// the caller, because the vote itself has already been committed.
    pub async fn incr_counters(&self, update: CounterUpdateGroup) {
        let (active_attr, peer_attr) = match update.vote_type {
            VoteType::Yes => (OUTGOING_YES_ATTR, INCOMING_YES_ATTR),
            VoteType::No => (OUTGOING_NO_ATTR, INCOMING_NO_ATTR),
            other => {
                warn!(vote_type = %other, "counters only track yes/no votes, ignoring");
                return;
            }
        };

        let hour = hour_start(update.event_time.timestamp());
        let ttl = hour + self.config.ttl_seconds;

        let writes = vec![
            IncrWrite {
                table: Table::Counters,
                key: Self::key(update.active_user_id, hour),
                attr: active_attr,
                ttl_epoch_seconds: Some(ttl),
                extra_sets: vec![(HOUR_ATTR, AttrValue::N(hour))],
            },
            IncrWrite {
                table: Table::Counters,
                key: Self::key(update.active_user_id, LIFETIME_BUCKET),
                attr: active_attr,
                ttl_epoch_seconds: None,
                extra_sets: vec![],
            },
            IncrWrite {
                table: Table::Counters,
                key: Self::key(update.peer_user_id, hour),
                attr: peer_attr,
                ttl_epoch_seconds: Some(ttl),
                extra_sets: vec![(HOUR_ATTR, AttrValue::N(hour))],
            },
            IncrWrite {
                table: Table::Counters,
                key: Self::key(update.peer_user_id, LIFETIME_BUCKET),
                attr: peer_attr,
                ttl_epoch_seconds: None,
                extra_sets: vec![],
            },
        ];

        if let Err(err) = self.kvs.transact_incr(writes).await {
            warn!(
                error = %err,
                active_user_id = %update.active_user_id,
                peer_user_id = %update.peer_user_id,
                "failed to update vote counters"
            );
        }
    }

    /// Consistent read of the all-time total, zero-valued if the user has
    /// never had a counter event.
    pub async fn get_lifetime_counter(&self, key: ActiveUserKey) -> CountersGroup {
        match self
            .kvs
            .get_item(Table::Counters, &Self::key(key.user_id, LIFETIME_BUCKET))
            .await
        {
            Ok(Some(item)) => item_to_group(&item),
            Ok(None) => CountersGroup::default(),
            Err(err) => {
                warn!(error = %err, user_id = %key.user_id, "failed to read lifetime counters");
                CountersGroup::default()
            }
        }
    }

    /// Each requested offset is a cumulative sliding window: "totals over
    /// the last `offset` hours", not the single hour `offset` hours ago. A
    /// single range query covers every requested bucket; each hourly row
    /// is folded into every bucket whose window it falls inside.
    pub async fn get_hourly_counters(
        &self,
        key: ActiveUserKey,
        offsets: &HoursOffsetGroups,
    ) -> HourlyCounters {
        let now_hour = hour_start(Utc::now().timestamp());
        let thresholds: Vec<(u32, i64)> = offsets
            .hours()
            .iter()
            .map(|&offset| (offset, now_hour - offset as i64 * 3600))
            .collect();
        let earliest = thresholds.iter().map(|&(_, t)| t).min().unwrap_or(now_hour);

        // One range query (`u = :pk AND h >= :sk`) over every hourly row
        // that could possibly be needed, rather than a point-read per
        // offset. Rows carry their own `h` attribute because `Kvs::query`
        // echoes no key back — the same self-describing-row trick
        // `romance.rs` uses for its `a`/`b` attributes.
        let mut rows: Vec<(i64, CountersGroup)> = Vec::new();
        let mut cursor = None;
        loop {
            let page = match self
                .kvs
                .query(
                    Table::Counters,
                    Index::Primary,
                    AttrValue::U(key.user_id),
                    Some(AttrValue::N(earliest)),
                    cursor,
                )
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, user_id = %key.user_id, "failed to query hourly counter rows");
                    return HourlyCounters::new();
                }
            };

            for item in &page.items {
                let hour = match item.get(HOUR_ATTR) {
                    Some(AttrValue::N(h)) => *h,
                    _ => continue,
                };
                rows.push((hour, item_to_group(item)));
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut result = HourlyCounters::new();
        for (offset, threshold) in thresholds {
            let mut bucket = CountersGroup::default();
            for &(hour, group) in &rows {
                if hour >= threshold {
                    bucket.add(group);
                }
            }
            result.set(offset, bucket);
        }
        result
    }
}
