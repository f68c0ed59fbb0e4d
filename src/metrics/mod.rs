use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for the persistence core
// ============================================================================
//
// Covers:
// - Snapshot saves and persist failures per aggregate type
// - Alias index conflicts and self-healing orphan cleanups
// - Legacy format migrations
// - Event bus fan-out and handler failures
//
// The registry is exposed for whoever embeds the store; nothing here serves
// HTTP.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Repository Metrics
    pub repository_saves: IntCounterVec,
    pub repository_persist_failures: IntCounterVec,
    pub repository_records: IntGaugeVec,

    // Alias Index Metrics
    pub alias_conflicts: IntCounter,
    pub orphaned_alias_cleanups: IntCounter,

    // Migration Metrics
    pub legacy_migrations: IntCounterVec,

    // Event Bus Metrics
    pub events_published: IntCounterVec,
    pub handler_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let repository_saves = IntCounterVec::new(
            Opts::new("repository_saves_total", "Total aggregate snapshots saved"),
            &["aggregate"],
        )?;
        registry.register(Box::new(repository_saves.clone()))?;

        let repository_persist_failures = IntCounterVec::new(
            Opts::new("repository_persist_failures_total", "Total failed document writes"),
            &["aggregate"],
        )?;
        registry.register(Box::new(repository_persist_failures.clone()))?;

        let repository_records = IntGaugeVec::new(
            Opts::new("repository_records", "Records currently held per aggregate type"),
            &["aggregate"],
        )?;
        registry.register(Box::new(repository_records.clone()))?;

        let alias_conflicts = IntCounter::new(
            "alias_conflicts_total",
            "Aliases skipped because another personality already owns them",
        )?;
        registry.register(Box::new(alias_conflicts.clone()))?;

        let orphaned_alias_cleanups = IntCounter::new(
            "orphaned_alias_cleanups_total",
            "Alias index entries removed on lookup because their target was missing",
        )?;
        registry.register(Box::new(orphaned_alias_cleanups.clone()))?;

        let legacy_migrations = IntCounterVec::new(
            Opts::new("legacy_migrations_total", "Legacy on-disk formats migrated"),
            &["format"],
        )?;
        registry.register(Box::new(legacy_migrations.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("event_bus_published_total", "Events published on the in-process bus"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let handler_failures = IntCounterVec::new(
            Opts::new("event_bus_handler_failures_total", "Event handlers that failed or panicked"),
            &["event_type"],
        )?;
        registry.register(Box::new(handler_failures.clone()))?;

        Ok(Self {
            registry,
            repository_saves,
            repository_persist_failures,
            repository_records,
            alias_conflicts,
            orphaned_alias_cleanups,
            legacy_migrations,
            events_published,
            handler_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_save(&self, aggregate: &str, records: usize) {
        self.repository_saves.with_label_values(&[aggregate]).inc();
        self.repository_records.with_label_values(&[aggregate]).set(records as i64);
    }

    pub fn record_persist_failure(&self, aggregate: &str) {
        self.repository_persist_failures.with_label_values(&[aggregate]).inc();
    }

    pub fn record_alias_conflict(&self) {
        self.alias_conflicts.inc();
    }

    pub fn record_orphan_cleanup(&self) {
        self.orphaned_alias_cleanups.inc();
    }

    pub fn record_migration(&self, format: &str) {
        self.legacy_migrations.with_label_values(&[format]).inc();
    }

    pub fn record_published(&self, event_type: &str) {
        self.events_published.with_label_values(&[event_type]).inc();
    }

    pub fn record_handler_failure(&self, event_type: &str) {
        self.handler_failures.with_label_values(&[event_type]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
