//! Drives the full in-memory stack the way `romance-worker` does: a
//! `VotingService` publishes a delete-romances request, and a `Dispatcher`
//! wired with the two cascade handlers processes it off the broker, the
//! same two-hop request -> scan -> batch-delete path the worker's topic
//! loops run.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use romance_ledger::config::{CountersConfig, RomancesConfig};
use romance_ledger::domain::{ActiveUserKey, VoteId, VoteType};
use romance_ledger::facade::{Command, VotingService};
use romance_ledger::kvs::memory::InMemoryKvs;
use romance_ledger::messaging::dispatcher::{DispatchOutcome, Dispatcher, Handler};
use romance_ledger::messaging::memory::InMemoryBroker;
use romance_ledger::messaging::{Subscriber, DELETE_ROMANCES_GROUP_TOPIC, DELETE_ROMANCES_TOPIC};
use romance_ledger::operations::cascade::{CascadeOperations, DeleteRomancesGroupHandler, DeleteRomancesHandler};
use romance_ledger::operations::VoteOperations;
use romance_ledger::repository::{CountersRepository, RomanceRepository};

struct Stack {
    service: VotingService,
    romances: Arc<RomanceRepository>,
    broker: Arc<InMemoryBroker>,
    dispatcher: Dispatcher,
}

fn build_stack() -> Stack {
    let kvs = Arc::new(InMemoryKvs::new());
    let romances = Arc::new(RomanceRepository::new(kvs.clone(), RomancesConfig::default()));
    let counters = Arc::new(CountersRepository::new(kvs, CountersConfig::default()));
    let votes = Arc::new(VoteOperations::new(romances.clone(), counters.clone(), 3));
    let broker = Arc::new(InMemoryBroker::new());
    let cascade = Arc::new(CascadeOperations::new(romances.clone(), broker.clone(), 25));
    let service = VotingService::new(votes, counters, cascade.clone());

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        DELETE_ROMANCES_TOPIC,
        Arc::new(DeleteRomancesHandler { cascade: cascade.clone() }) as Arc<dyn Handler>,
    );
    dispatcher.register(
        DELETE_ROMANCES_GROUP_TOPIC,
        Arc::new(DeleteRomancesGroupHandler { cascade }) as Arc<dyn Handler>,
    );

    Stack {
        service,
        romances,
        broker,
        dispatcher,
    }
}

/// Pulls and dispatches every currently-queued message on `topic`, acking
/// each on success, stopping once the topic reports empty.
async fn drain_topic(stack: &Stack, topic: &'static str) {
    loop {
        let Some(message) = stack.broker.receive(topic).await.unwrap() else {
            break;
        };
        match stack.dispatcher.dispatch(topic, &message.body).await {
            DispatchOutcome::Handled => stack.broker.ack(topic, &message.id).await.unwrap(),
            DispatchOutcome::NoHandlerMatched => panic!("no handler matched draining {topic}"),
            DispatchOutcome::HandlerErrors(errors) => panic!("handler errors draining {topic}: {errors:?}"),
        }
    }
}

#[tokio::test]
async fn request_delete_romances_cascades_through_both_topics() {
    let stack = build_stack();
    let country = 44u16;
    let active_user = Uuid::new_v4();

    let mut peers = Vec::new();
    for _ in 0..30 {
        let peer = Uuid::new_v4();
        stack
            .service
            .add_user_vote(country, active_user, peer, VoteType::Yes, Utc::now())
            .await
            .unwrap();
        peers.push(peer);
    }

    stack
        .service
        .dispatch(Command::DeleteRomances {
            key: ActiveUserKey::new(country, active_user).unwrap(),
        })
        .await
        .unwrap();

    drain_topic(&stack, DELETE_ROMANCES_TOPIC).await;
    drain_topic(&stack, DELETE_ROMANCES_GROUP_TOPIC).await;

    for peer in peers {
        let vote_id = VoteId::new(country, active_user, peer).unwrap();
        let romance = stack.romances.get_romance(vote_id).await.unwrap();
        assert!(romance.is_empty(), "romance with {peer} should have been deleted by the cascade");
    }
}

#[tokio::test]
async fn delete_romances_with_no_peers_publishes_no_group_messages() {
    let stack = build_stack();
    let key = ActiveUserKey::new(7, Uuid::new_v4()).unwrap();

    stack.service.dispatch(Command::DeleteRomances { key }).await.unwrap();
    drain_topic(&stack, DELETE_ROMANCES_TOPIC).await;

    assert!(stack.broker.receive(DELETE_ROMANCES_GROUP_TOPIC).await.unwrap().is_none());
}
