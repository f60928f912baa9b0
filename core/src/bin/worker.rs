//! Message-processor worker (§5 process shape 2): one long-lived
//! subscriber loop per topic, running concurrently, each pulling one
//! message at a time, dispatching synchronously, acking on success and
//! nacking on error or panic. A signal-driven cancellation token stops
//! every loop; the process blocks until all of them have returned.
//!
//! Grounded in the teacher crate's own worker-loop shape
//! (`federation::queue::OutboundQueue::run_worker`): a `tokio::select!`
//! between the next poll and the cancellation token, with an idle topic
//! backed off by a short sleep rather than busy-polling.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use romance_ledger::config::Config;
use romance_ledger::db;
use romance_ledger::kvs::memory::InMemoryKvs;
use romance_ledger::kvs::postgres::PostgresKvs;
use romance_ledger::kvs::Kvs;
use romance_ledger::messaging::dispatcher::{DispatchOutcome, Dispatcher, Handler};
use romance_ledger::messaging::memory::InMemoryBroker;
use romance_ledger::messaging::postgres::PostgresBroker;
use romance_ledger::messaging::{Publisher, Subscriber, DELETE_ROMANCES_GROUP_TOPIC, DELETE_ROMANCES_TOPIC};
use romance_ledger::operations::cascade::{CascadeOperations, DeleteRomancesGroupHandler, DeleteRomancesHandler};
use romance_ledger::repository::RomanceRepository;

const IDLE_BACKOFF: Duration = Duration::from_millis(250);

async fn run_topic_loop(
    topic: &'static str,
    subscriber: Arc<dyn Subscriber>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    info!(topic, "worker loop starting");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let received = tokio::select! {
            res = subscriber.receive(topic) => res,
            _ = cancel.cancelled() => break,
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                    _ = cancel.cancelled() => break,
                }
            }
            Err(err) => {
                error!(topic, error = %err, "receive failed, backing off");
                tokio::time::sleep(IDLE_BACKOFF).await;
                continue;
            }
        };

        let dispatch_result = AssertUnwindSafe(dispatcher.dispatch(topic, &message.body))
            .catch_unwind()
            .await;

        let outcome = match dispatch_result {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(topic, message_id = %message.id, ?panic, "handler panicked, nacking message");
                let _ = subscriber.nack(topic, &message.id).await;
                continue;
            }
        };

        match outcome {
            DispatchOutcome::Handled => {
                if let Err(err) = subscriber.ack(topic, &message.id).await {
                    error!(topic, message_id = %message.id, error = %err, "ack failed");
                }
            }
            DispatchOutcome::NoHandlerMatched => {
                warn!(topic, message_id = %message.id, "no handler matched, nacking");
                let _ = subscriber.nack(topic, &message.id).await;
            }
            DispatchOutcome::HandlerErrors(errors) => {
                for err in &errors {
                    error!(topic, message_id = %message.id, error = %err, "handler failed");
                }
                let _ = subscriber.nack(topic, &message.id).await;
            }
        }
    }
    info!(topic, "worker loop stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();

    // Both adapters implement `Publisher` and `Subscriber` on the same
    // concrete type, so each backend branch clones its one broker `Arc`
    // into the two trait-object views the rest of the worker needs,
    // instead of threading a single combined trait through.
    let (kvs, publisher, subscriber): (Arc<dyn Kvs>, Arc<dyn Publisher>, Arc<dyn Subscriber>) =
        if std::env::var("USE_IN_MEMORY_BACKEND").is_ok() {
            info!("starting worker against in-memory KVS/messaging backends");
            let kvs = Arc::new(InMemoryKvs::new());
            let broker = Arc::new(InMemoryBroker::new());
            (kvs, broker.clone(), broker)
        } else {
            let pool = db::init_db(&config).await?;
            let kvs = Arc::new(PostgresKvs::new(pool.clone()));
            kvs.ensure_schema().await?;
            let broker = Arc::new(PostgresBroker::new(pool));
            broker.ensure_schema().await?;
            (kvs, broker.clone(), broker)
        };

    let romances = Arc::new(RomanceRepository::new(kvs, config.romances));
    let cascade = Arc::new(CascadeOperations::new(romances, publisher, config.group_delete_limit));

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        DELETE_ROMANCES_TOPIC,
        Arc::new(DeleteRomancesHandler { cascade: cascade.clone() }) as Arc<dyn Handler>,
    );
    dispatcher.register(
        DELETE_ROMANCES_GROUP_TOPIC,
        Arc::new(DeleteRomancesGroupHandler { cascade }) as Arc<dyn Handler>,
    );
    let dispatcher = Arc::new(dispatcher);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, stopping worker loops");
        shutdown.cancel();
    });

    let loop_a = tokio::spawn(run_topic_loop(
        DELETE_ROMANCES_TOPIC,
        subscriber.clone(),
        dispatcher.clone(),
        cancel.clone(),
    ));
    let loop_b = tokio::spawn(run_topic_loop(
        DELETE_ROMANCES_GROUP_TOPIC,
        subscriber,
        dispatcher,
        cancel,
    ));

    let _ = tokio::join!(loop_a, loop_b);
    info!("worker exited cleanly");
    Ok(())
}
