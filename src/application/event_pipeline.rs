// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Pipeline (Application Service)
//!
//! Ordered stages: filters → enrichers → persist → counter → critical
//! classification → aggregation. A filter rejecting an event terminates
//! processing; enrichers are additive and never drop. Persistence happens
//! exactly once per accepted event.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::event::{Event, EventSeverity, InternalEvent};
use crate::domain::repository::{CacheStore, ClusterRepository, EventRepository, RepositoryError};
use crate::infrastructure::bus::MessageBus;

/// Deduplication window per `(cluster_id, reason, labels["name"])`.
pub const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// Number of recent events retained per aggregation group.
const GROUP_RING_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Outcome of one pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Filtered,
}

/// Composable, short-circuiting event filter.
#[async_trait::async_trait]
pub trait EventFilter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn should_process(&self, event: &Event) -> bool;
}

/// Additive enricher. Failures are logged and never drop the event.
#[async_trait::async_trait]
pub trait EventEnricher: Send + Sync {
    async fn enrich(&self, event: &mut Event);
}

/// Filter → enrich → persist → classify → aggregate.
pub struct EventPipeline {
    store: Arc<dyn EventRepository>,
    cache: Arc<dyn CacheStore>,
    bus: Arc<dyn MessageBus>,
    filters: Vec<Box<dyn EventFilter>>,
    enrichers: Vec<Box<dyn EventEnricher>>,
    aggregator: Aggregator,

    events_processed: AtomicU64,
    events_filtered: AtomicU64,
    events_failed: AtomicU64,
}

impl EventPipeline {
    /// Standard pipeline: severity gate, 5-minute dedup window, cluster
    /// metadata enrichment.
    pub fn new(
        store: Arc<dyn EventRepository>,
        cache: Arc<dyn CacheStore>,
        clusters: Arc<dyn ClusterRepository>,
        bus: Arc<dyn MessageBus>,
        min_severity: EventSeverity,
    ) -> Self {
        let filters: Vec<Box<dyn EventFilter>> = vec![
            Box::new(SeverityFilter { min_severity }),
            Box::new(DuplicateFilter {
                cache: Arc::clone(&cache),
                ttl: DEDUP_TTL,
            }),
        ];
        let enrichers: Vec<Box<dyn EventEnricher>> =
            vec![Box::new(ClusterEnricher { clusters })];
        Self::with_stages(store, cache, bus, filters, enrichers)
    }

    pub fn with_stages(
        store: Arc<dyn EventRepository>,
        cache: Arc<dyn CacheStore>,
        bus: Arc<dyn MessageBus>,
        filters: Vec<Box<dyn EventFilter>>,
        enrichers: Vec<Box<dyn EventEnricher>>,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            filters,
            enrichers,
            aggregator: Aggregator::new(),
            events_processed: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
        }
    }

    pub async fn process(&self, mut event: Event) -> Result<ProcessOutcome, PipelineError> {
        for filter in &self.filters {
            if !filter.should_process(&event).await {
                self.events_filtered.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id, filter = filter.name(), "event filtered");
                return Ok(ProcessOutcome::Filtered);
            }
        }

        for enricher in &self.enrichers {
            enricher.enrich(&mut event).await;
        }

        event.processed_at = Some(Utc::now());

        if let Err(e) = self.store.insert(&event).await {
            self.events_failed.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        if let Err(e) = self
            .cache
            .increment_event_counter(&event.cluster_id, event.severity.as_str())
            .await
        {
            warn!(error = %e, "failed to increment event counter");
        }

        if event.is_critical() {
            self.publish_critical(&event).await;
        }

        self.aggregator.add(&event);
        self.events_processed.fetch_add(1, Ordering::Relaxed);

        info!(
            event_id = %event.id,
            cluster_id = %event.cluster_id,
            severity = %event.severity,
            reason = %event.reason,
            "event processed"
        );
        Ok(ProcessOutcome::Processed)
    }

    /// Republish a critical event onto the internal bus. Publish failures are
    /// surfaced in the log and error counter only; the event is already
    /// persisted.
    async fn publish_critical(&self, event: &Event) {
        let internal = InternalEvent::critical(event);
        let subject = internal.subject();
        let payload = match serde_json::to_vec(&internal) {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "failed to marshal internal event");
                return;
            }
        };
        match self.bus.publish(&subject, payload).await {
            Ok(()) => {
                info!(event_id = %event.id, subject = %subject, "internal event published")
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "failed to publish internal event")
            }
        }
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "events_processed": self.events_processed.load(Ordering::Relaxed),
            "events_filtered": self.events_filtered.load(Ordering::Relaxed),
            "events_failed": self.events_failed.load(Ordering::Relaxed),
            "aggregator": self.aggregator.statistics(),
        })
    }

    pub fn events_filtered(&self) -> u64 {
        self.events_filtered.load(Ordering::Relaxed)
    }
}

/// Drops events below the configured minimum severity. Unknown severities
/// rank 0 and are always dropped.
pub struct SeverityFilter {
    pub min_severity: EventSeverity,
}

#[async_trait::async_trait]
impl EventFilter for SeverityFilter {
    fn name(&self) -> &'static str {
        "severity"
    }

    async fn should_process(&self, event: &Event) -> bool {
        event.severity.rank() >= self.min_severity.rank()
    }
}

/// Suppresses repeats of the same `(cluster, reason, name)` within the dedup
/// window using a set-if-absent cache lock. Lock newly created means first
/// occurrence; cache errors fail open.
pub struct DuplicateFilter {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

#[async_trait::async_trait]
impl EventFilter for DuplicateFilter {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    async fn should_process(&self, event: &Event) -> bool {
        let key = format!(
            "event:seen:{}:{}:{}",
            event.cluster_id,
            event.reason,
            event.name_label()
        );
        match self.cache.acquire_lock(&key, self.ttl).await {
            Ok(newly_created) => newly_created,
            Err(e) => {
                warn!(error = %e, "dedup lock unavailable, processing event");
                true
            }
        }
    }
}

/// Attaches cluster name/environment/region to the event raw data. A missing
/// cluster is non-fatal.
pub struct ClusterEnricher {
    clusters: Arc<dyn ClusterRepository>,
}

#[async_trait::async_trait]
impl EventEnricher for ClusterEnricher {
    async fn enrich(&self, event: &mut Event) {
        let cluster = match self.clusters.find_by_id(&event.cluster_id).await {
            Ok(Some(cluster)) => cluster,
            Ok(None) => return,
            Err(e) => {
                warn!(cluster_id = %event.cluster_id, error = %e, "cluster lookup failed");
                return;
            }
        };
        event
            .raw_data
            .insert("cluster_name".into(), serde_json::json!(cluster.name));
        event.raw_data.insert(
            "cluster_environment".into(),
            serde_json::json!(cluster.environment),
        );
        event
            .raw_data
            .insert("cluster_region".into(), serde_json::json!(cluster.region));
    }
}

/// Groups related events by `<cluster>:<namespace>:<name>`, keeping counts
/// and a ring of recent events. In-memory only; groups are not evicted.
pub struct Aggregator {
    groups: Mutex<HashMap<String, EventGroup>>,
}

#[derive(Debug, Clone)]
pub struct EventGroup {
    pub key: String,
    pub events: Vec<Event>,
    pub first_seen: chrono::DateTime<Utc>,
    pub last_seen: chrono::DateTime<Utc>,
    pub count: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, event: &Event) {
        let key = format!(
            "{}:{}:{}",
            event.cluster_id,
            event.namespace,
            event.name_label()
        );
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let group = groups.entry(key.clone()).or_insert_with(|| EventGroup {
            key,
            events: Vec::new(),
            first_seen: event.timestamp,
            last_seen: event.timestamp,
            count: 0,
        });
        group.events.push(event.clone());
        group.last_seen = event.timestamp;
        group.count += 1;
        if group.events.len() > GROUP_RING_SIZE {
            let excess = group.events.len() - GROUP_RING_SIZE;
            group.events.drain(..excess);
        }
    }

    pub fn group(&self, key: &str) -> Option<EventGroup> {
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn statistics(&self) -> serde_json::Value {
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({ "active_groups": groups.len() })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::Cluster;
    use crate::domain::repository::CacheError;
    use crate::infrastructure::bus::memory::InMemoryBus;
    use crate::infrastructure::memory_cache::InMemoryCache;
    use crate::infrastructure::repositories::memory::{
        InMemoryClusterRepository, InMemoryEventRepository,
    };

    fn event(id: &str, severity: &str, reason: &str, name: &str) -> Event {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "cluster_id": "c1",
            "severity": severity,
            "reason": reason,
            "namespace": "default",
            "labels": { "name": name },
        }))
        .unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryEventRepository>,
        clusters: Arc<InMemoryClusterRepository>,
        bus: Arc<InMemoryBus>,
        pipeline: EventPipeline,
    }

    fn fixture(min_severity: EventSeverity) -> Fixture {
        let store = Arc::new(InMemoryEventRepository::new());
        let cache = Arc::new(InMemoryCache::new());
        let clusters = Arc::new(InMemoryClusterRepository::new());
        let bus = Arc::new(InMemoryBus::new());
        let pipeline = EventPipeline::new(
            Arc::clone(&store) as Arc<dyn EventRepository>,
            cache,
            Arc::clone(&clusters) as Arc<dyn ClusterRepository>,
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            min_severity,
        );
        Fixture {
            store,
            clusters,
            bus,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_severity_filter_drops_below_minimum() {
        let f = fixture(EventSeverity::Medium);
        let outcome = f
            .pipeline
            .process(event("e1", "low", "BackOff", "p1"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Filtered);
        assert_eq!(f.pipeline.events_filtered(), 1);
        assert!(f.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_severity_always_filtered() {
        let f = fixture(EventSeverity::Low);
        let outcome = f
            .pipeline
            .process(event("e1", "bogus", "BackOff", "p1"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Filtered);
    }

    #[tokio::test]
    async fn test_duplicate_within_window_persisted_once() {
        let f = fixture(EventSeverity::Low);
        let first = f
            .pipeline
            .process(event("e1", "high", "CrashLoopBackOff", "p1"))
            .await
            .unwrap();
        let second = f
            .pipeline
            .process(event("e2", "high", "CrashLoopBackOff", "p1"))
            .await
            .unwrap();
        assert_eq!(first, ProcessOutcome::Processed);
        assert_eq!(second, ProcessOutcome::Filtered);
        assert_eq!(f.store.all().len(), 1);
        assert_eq!(f.pipeline.events_filtered(), 1);
    }

    #[tokio::test]
    async fn test_distinct_name_labels_not_deduplicated() {
        let f = fixture(EventSeverity::Low);
        f.pipeline
            .process(event("e1", "high", "CrashLoopBackOff", "p1"))
            .await
            .unwrap();
        f.pipeline
            .process(event("e2", "high", "CrashLoopBackOff", "p2"))
            .await
            .unwrap();
        assert_eq!(f.store.all().len(), 2);
    }

    #[tokio::test]
    async fn test_cluster_enricher_attaches_metadata() {
        let f = fixture(EventSeverity::Low);
        f.clusters
            .save(&Cluster {
                id: "c1".into(),
                name: "prod-east".into(),
                description: String::new(),
                environment: "prod".into(),
                region: "us-east-1".into(),
                provider: "eks".into(),
                status: Default::default(),
                health: Default::default(),
                version: String::new(),
                agent_count: 0,
                node_count: 0,
                pod_count: 0,
                metadata: HashMap::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        f.pipeline
            .process(event("e1", "high", "BackOff", "p1"))
            .await
            .unwrap();

        let stored = &f.store.all()[0];
        assert_eq!(
            stored.raw_data.get("cluster_name"),
            Some(&serde_json::json!("prod-east"))
        );
        assert_eq!(
            stored.raw_data.get("cluster_region"),
            Some(&serde_json::json!("us-east-1"))
        );
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_critical_event_published_internally() {
        let f = fixture(EventSeverity::Low);
        let mut sub = f.bus.subscribe("internal.event.critical").await.unwrap();

        f.pipeline
            .process(event("e1", "high", "OOMKilling", "p1"))
            .await
            .unwrap();

        let msg = sub.recv().await.unwrap();
        let internal: InternalEvent = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(internal.cluster_id, "c1");
        assert_eq!(
            internal.payload.get("reason"),
            Some(&serde_json::json!("OOMKilling"))
        );
    }

    #[tokio::test]
    async fn test_non_critical_event_not_published() {
        let f = fixture(EventSeverity::Low);
        let mut sub = f.bus.subscribe("internal.event.critical").await.unwrap();

        f.pipeline
            .process(event("e1", "medium", "BackOff", "p1"))
            .await
            .unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(50), sub.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_aggregator_groups_and_ring() {
        let aggregator = Aggregator::new();
        for i in 0..15 {
            aggregator.add(&event(&format!("e{i}"), "high", "BackOff", "p1"));
        }
        let group = aggregator.group("c1:default:p1").unwrap();
        assert_eq!(group.count, 15);
        assert_eq!(group.events.len(), 10);
        assert_eq!(group.events.first().unwrap().id, "e5");
    }

    /// Cache backend that always errors, to exercise the fail-open path.
    struct BrokenCache;

    #[async_trait::async_trait]
    impl CacheStore for BrokenCache {
        async fn cache_agent(
            &self,
            _: &crate::domain::agent::Agent,
            _: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn get_cached_agent(
            &self,
            _: &str,
        ) -> Result<Option<crate::domain::agent::Agent>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn delete_cached_agent(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn set_agent_online(&self, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn is_agent_online(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn increment_event_counter(&self, _: &str, _: &str) -> Result<i64, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn get_event_count(&self, _: &str, _: &str) -> Result<i64, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn acquire_lock(&self, _: &str, _: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn release_lock(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn health(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_cache_failure_fails_open() {
        let store = Arc::new(InMemoryEventRepository::new());
        let clusters = Arc::new(InMemoryClusterRepository::new());
        let bus = Arc::new(InMemoryBus::new());
        let pipeline = EventPipeline::new(
            Arc::clone(&store) as Arc<dyn EventRepository>,
            Arc::new(BrokenCache),
            clusters,
            bus,
            EventSeverity::Low,
        );

        // Both copies process despite the dead cache.
        pipeline
            .process(event("e1", "high", "CrashLoopBackOff", "p1"))
            .await
            .unwrap();
        pipeline
            .process(event("e2", "high", "CrashLoopBackOff", "p1"))
            .await
            .unwrap();
        assert_eq!(store.all().len(), 2);
    }
}
