use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::fs::{FileSystem, TokioFileSystem};
use super::snapshot_store::SnapshotStore;
use crate::event_sourcing::bus::{EventBus, PublishReport};
use crate::event_sourcing::core::{DomainEvent, EventEnvelope};
use crate::metrics::Metrics;
use crate::utils::{Clock, SystemClock};

/// Collaborators shared by every file-backed repository
#[derive(Clone)]
pub struct RepositoryContext {
    pub fs: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub event_bus: Option<EventBus>,
}

impl RepositoryContext {
    pub fn new() -> Self {
        Self {
            fs: Arc::new(TokioFileSystem),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(Metrics::default()),
            event_bus: None,
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn snapshot_store<D>(
        &self,
        aggregate: &'static str,
        path: impl Into<PathBuf>,
    ) -> SnapshotStore<D>
    where
        D: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
    {
        SnapshotStore::new(aggregate, path, self.fs.clone(), self.metrics.clone())
    }

    /// Publish committed events, in order. Without a bus this is a no-op.
    /// Encoding or handler failures are logged and never fail the save.
    pub async fn publish_committed<E: DomainEvent>(
        &self,
        events: Vec<EventEnvelope<E>>,
    ) -> PublishReport {
        let mut total = PublishReport::default();
        let Some(bus) = &self.event_bus else {
            return total;
        };

        for envelope in events {
            let record = match envelope.to_record() {
                Ok(record) => record,
                Err(error) => {
                    tracing::error!(
                        event_id = %envelope.event_id,
                        error = %error,
                        "Could not encode committed event for publishing"
                    );
                    continue;
                }
            };

            let report = bus.publish(record).await;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }

        total
    }
}

impl Default for RepositoryContext {
    fn default() -> Self {
        Self::new()
    }
}
