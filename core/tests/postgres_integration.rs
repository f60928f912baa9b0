//! Exercises the Postgres-backed [`PostgresKvs`]/[`PostgresBroker`] adapters
//! against a real database, the same way the teacher crate's own
//! `tests/db_tests.rs` and `tests/race_conditions.rs` do: a `TEST_DATABASE_URL`
//! env var picks the target, and every test truncates its own tables before
//! asserting anything. These tests are skipped (not failed) when no test
//! database is reachable, since CI for this crate doesn't provision one by
//! default.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use romance_ledger::config::{Config, CountersConfig, RomancesConfig};
use romance_ledger::domain::{ActiveUserKey, VoteId, VoteType};
use romance_ledger::kvs::postgres::PostgresKvs;
use romance_ledger::messaging::postgres::PostgresBroker;
use romance_ledger::messaging::{Subscriber, DELETE_ROMANCES_TOPIC};
use romance_ledger::operations::VoteOperations;
use romance_ledger::repository::{CountersRepository, RomanceRepository};

async fn test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let config = Config {
        database_url,
        max_connections: 5,
        min_connections: 1,
        acquire_timeout: Duration::from_secs(5),
        ..Config::default()
    };
    romance_ledger::db::init_db(&config).await.ok()
}

async fn cleanup(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE kvs_romances, kvs_counters, messaging_queue")
        .execute(pool)
        .await
        .expect("failed to truncate test tables");
}

macro_rules! require_test_db {
    () => {
        match test_pool().await {
            Some(pool) => pool,
            None => {
                eprintln!("skipping: TEST_DATABASE_URL not set or database unreachable");
                return;
            }
        }
    };
}

#[tokio::test]
async fn add_and_change_vote_round_trips_through_postgres() {
    let pool = require_test_db!();
    let kvs = Arc::new(PostgresKvs::new(pool.clone()));
    kvs.ensure_schema().await.unwrap();
    cleanup(&pool).await;

    let romances = Arc::new(RomanceRepository::new(kvs.clone(), RomancesConfig::default()));
    let counters = Arc::new(CountersRepository::new(kvs, CountersConfig::default()));
    let ops = VoteOperations::new(romances, counters, 3);

    let vote_id = VoteId::new(9, Uuid::new_v4(), Uuid::new_v4()).unwrap();
    let romance = ops.add_user_vote(vote_id, VoteType::No, Utc::now()).await.unwrap();
    assert_eq!(romance.vote_of(vote_id.active_user_id).unwrap().vote_type, VoteType::No);

    let changed = ops.change_user_vote(vote_id, VoteType::Yes).await.unwrap();
    assert_eq!(changed.vote_of(vote_id.active_user_id).unwrap().vote_type, VoteType::Yes);

    let mirrored = ops.get_romance(vote_id.to_peer()).await.unwrap();
    assert_eq!(mirrored.peer_vote_of(vote_id.peer_user_id).unwrap().vote_type, VoteType::Yes);
}

#[tokio::test]
async fn concurrent_version_conflicts_are_resolved_by_the_retry_loop() {
    let pool = require_test_db!();
    let kvs = Arc::new(PostgresKvs::new(pool.clone()));
    kvs.ensure_schema().await.unwrap();
    cleanup(&pool).await;

    let romances = Arc::new(RomanceRepository::new(kvs.clone(), RomancesConfig::default()));
    let counters = Arc::new(CountersRepository::new(kvs, CountersConfig::default()));
    let ops = Arc::new(VoteOperations::new(romances, counters, 5));

    let active_user = Uuid::new_v4();
    let country = 3u16;

    // Several peers voted on concurrently by the same active user hit the
    // same romance row only when they collide on `(pk, sk)`, which requires
    // distinct peers to map to the same pair under the canonical key — not
    // reachable here, so instead this drives many concurrent writers at the
    // same single pair to force the CAS loop to actually retry.
    let peer = Uuid::new_v4();
    let vote_id = VoteId::new(country, active_user, peer).unwrap();

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let ops = ops.clone();
        handles.push(tokio::spawn(async move {
            let vote_type = if i % 2 == 0 { VoteType::Yes } else { VoteType::No };
            ops.change_user_vote(vote_id, vote_type).await
        }));
    }

    // The very first cast has to happen before any change can succeed.
    ops.add_user_vote(vote_id, VoteType::Yes, Utc::now()).await.ok();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert!(successes > 0, "at least one concurrent change should have won the CAS race");
}

#[tokio::test]
async fn postgres_broker_round_trips_a_published_message() {
    let pool = require_test_db!();
    cleanup(&pool).await;
    let broker = PostgresBroker::new(pool);
    broker.ensure_schema().await.unwrap();

    let key = ActiveUserKey::new(5, Uuid::new_v4()).unwrap();
    let message = romance_ledger::messaging::DeleteRomancesMessage::new(key);
    romance_ledger::messaging::publish(&broker, DELETE_ROMANCES_TOPIC, message.clone())
        .await
        .unwrap();

    let received = broker.receive(DELETE_ROMANCES_TOPIC).await.unwrap().expect("message should be queued");
    let decoded: romance_ledger::messaging::DeleteRomancesMessage =
        romance_ledger::messaging::decode(&received.body).unwrap();
    assert_eq!(decoded, message);

    broker.ack(DELETE_ROMANCES_TOPIC, &received.id).await.unwrap();
    assert!(broker.receive(DELETE_ROMANCES_TOPIC).await.unwrap().is_none());
}
