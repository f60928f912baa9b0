//! Topic → handler-name registry, grounded in
//! `original_source/internal/shared/messaging/handler.go`'s
//! `TopicHandler`: registration panics on a duplicate handler name for the
//! same topic (a startup-time configuration bug, not a runtime condition),
//! and dispatch probes every handler registered on the topic, running
//! whichever recognize the envelope.
//!
//! Unlike the original, a message that matches no handler is reported back
//! as [`DispatchOutcome::NoHandlerMatched`] rather than silently logged and
//! acked — the worker loop turns that into a nack, since an unrecognized
//! message on a topic this service owns almost always means a
//! misconfigured deploy, not an intentionally-ignored event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means this handler doesn't recognize `body` (wrong envelope
    /// name) — distinct from recognizing it and failing.
    async fn handle(&self, body: &str) -> Option<anyhow::Result<()>>;
}

pub enum DispatchOutcome {
    Handled,
    NoHandlerMatched,
    HandlerErrors(Vec<anyhow::Error>),
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Vec<Arc<dyn Handler>>>,
    registered_names: HashMap<&'static str, HashSet<&'static str>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics if `handler.name()` is already registered for `topic` — a
    /// duplicate registration is a startup-time programming error, not
    /// something to recover from at runtime.
    pub fn register(&mut self, topic: &'static str, handler: Arc<dyn Handler>) {
        let names = self.registered_names.entry(topic).or_default();
        if !names.insert(handler.name()) {
            panic!("handler with name {:?} already registered for topic {:?}", handler.name(), topic);
        }
        self.handlers.entry(topic).or_default().push(handler);
    }

    pub async fn dispatch(&self, topic: &'static str, body: &str) -> DispatchOutcome {
        let Some(handlers) = self.handlers.get(topic) else {
            return DispatchOutcome::NoHandlerMatched;
        };

        let mut matched = false;
        let mut errors = Vec::new();
        for handler in handlers {
            match handler.handle(body).await {
                None => continue,
                Some(Ok(())) => matched = true,
                Some(Err(err)) => {
                    matched = true;
                    errors.push(err);
                }
            }
        }

        if !matched {
            DispatchOutcome::NoHandlerMatched
        } else if errors.is_empty() {
            DispatchOutcome::Handled
        } else {
            DispatchOutcome::HandlerErrors(errors)
        }
    }
}
