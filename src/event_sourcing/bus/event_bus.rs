use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::event_sourcing::core::EventRecord;
use crate::metrics::Metrics;

// ============================================================================
// Event Bus - In-Process Fan-Out for Decoupled Side Effects
// ============================================================================
//
// Handlers subscribe per event type (or "*" for everything). publish() runs
// every matching handler on its own task; a handler that errors or panics is
// logged and counted but never affects its siblings or the publisher.
//
// No persistence, no retry, no replay: a handler that is not subscribed when
// an event is published never sees it.
//
// ============================================================================

pub const WILDCARD: &str = "*";

pub type EventHandler =
    Arc<dyn Fn(EventRecord) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

type HandlerTable = HashMap<String, Vec<(u64, EventHandler)>>;

/// Outcome of a single publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<HandlerTable>>,
    next_id: Arc<AtomicU64>,
    metrics: Option<Arc<Metrics>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a handler for one event type, or `WILDCARD` for all
    pub fn subscribe<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: EventHandler =
            Arc::new(move |record| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(record))
            });

        self.handlers
            .write()
            .entry(event_type.clone())
            .or_default()
            .push((id, handler));

        tracing::debug!(event_type = %event_type, subscription_id = id, "Handler subscribed");

        Subscription {
            id,
            event_type,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver a record to all matching and wildcard handlers concurrently
    pub async fn publish(&self, record: EventRecord) -> PublishReport {
        let targets: Vec<EventHandler> = {
            let table = self.handlers.read();
            table
                .get(&record.event_type)
                .into_iter()
                .chain(table.get(WILDCARD))
                .flatten()
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_published(&record.event_type);
        }

        if targets.is_empty() {
            tracing::debug!(event_type = %record.event_type, "No subscribers listening to event");
            return PublishReport::default();
        }

        let tasks = targets.into_iter().map(|handler| {
            let record = record.clone();
            tokio::spawn(async move { handler(record).await })
        });

        let mut report = PublishReport::default();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    tracing::error!(
                        event_type = %record.event_type,
                        event_id = %record.event_id,
                        error = %error,
                        "Event handler failed"
                    );
                }
                Err(join_error) => {
                    report.failed += 1;
                    tracing::error!(
                        event_type = %record.event_type,
                        event_id = %record.event_id,
                        error = %join_error,
                        "Event handler panicked"
                    );
                }
            }
        }

        if report.failed > 0 {
            if let Some(metrics) = &self.metrics {
                for _ in 0..report.failed {
                    metrics.record_handler_failure(&record.event_type);
                }
            }
        }

        report
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; dropping it keeps the handler registered
pub struct Subscription {
    id: u64,
    event_type: String,
    handlers: Weak<RwLock<HandlerTable>>,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove the handler. Safe to call after the bus is gone.
    pub fn unsubscribe(self) {
        let Some(handlers) = self.handlers.upgrade() else {
            return;
        };

        let mut table = handlers.write();
        if let Some(list) = table.get_mut(&self.event_type) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                table.remove(&self.event_type);
            }
        }

        tracing::debug!(event_type = %self.event_type, subscription_id = self.id, "Handler unsubscribed");
    }
}
