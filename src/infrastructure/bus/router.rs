// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bus Router
//!
//! Subject-pattern subscriptions that decode agent messages and hand off to
//! the registry, event pipeline and command dispatcher. Each handler runs on
//! its own task; decode failures increment the error counter and drop the
//! message (no dead-letter queue).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{subjects, BusError, BusMessage, MessageBus};
use crate::application::dispatcher::CommandDispatcher;
use crate::application::event_pipeline::EventPipeline;
use crate::application::registry::AgentRegistry;
use crate::domain::agent::{Agent, Heartbeat};
use crate::domain::command::CommandResult;
use crate::domain::event::Event;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Routes agent subjects to the core components.
pub struct BusRouter {
    bus: Arc<dyn MessageBus>,
    registry: Arc<AgentRegistry>,
    pipeline: Arc<EventPipeline>,
    dispatcher: Arc<CommandDispatcher>,
    shutdown: CancellationToken,

    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    error_count: AtomicU64,
}

impl BusRouter {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<AgentRegistry>,
        pipeline: Arc<EventPipeline>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Self {
        Self {
            bus,
            registry,
            pipeline,
            dispatcher,
            shutdown: CancellationToken::new(),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Subscribe to all agent subjects and start the keepalive monitor.
    pub async fn start(self: &Arc<Self>) -> Result<(), BusError> {
        info!("starting bus router");

        self.spawn_handler(subjects::REGISTER, Self::handle_register)
            .await?;
        self.spawn_handler(subjects::HEARTBEAT, Self::handle_heartbeat)
            .await?;
        self.spawn_handler(subjects::EVENT, Self::handle_event)
            .await?;
        self.spawn_handler(subjects::METRICS, Self::handle_metrics)
            .await?;
        self.spawn_handler(subjects::RESULT, Self::handle_result)
            .await?;

        let router = Arc::clone(self);
        tokio::spawn(async move { router.keepalive_monitor().await });

        info!("bus router started");
        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping bus router");
        self.shutdown.cancel();
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "connected": self.bus.is_connected(),
            "messages_received": self.messages_received.load(Ordering::Relaxed),
            "messages_sent": self.messages_sent.load(Ordering::Relaxed),
            "error_count": self.error_count.load(Ordering::Relaxed),
        })
    }

    async fn spawn_handler<F, Fut>(self: &Arc<Self>, subject: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(Arc<Self>, BusMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut subscription = self.bus.subscribe(subject).await?;
        info!(subject = %subject, "subscribed");

        let router = Arc::clone(self);
        let subject = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = router.shutdown.cancelled() => return,
                    message = subscription.recv() => match message {
                        Some(message) => {
                            router.messages_received.fetch_add(1, Ordering::Relaxed);
                            handler(Arc::clone(&router), message).await;
                        }
                        None => {
                            warn!(subject = %subject, "subscription closed");
                            return;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn handle_register(self: Arc<Self>, message: BusMessage) {
        let agent: Agent = match serde_json::from_slice(&message.payload) {
            Ok(agent) => agent,
            Err(e) => {
                error!(error = %e, "failed to decode register message");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let registered = match self.registry.register(agent).await {
            Ok(registered) => registered,
            Err(e) => {
                error!(error = %e, "failed to register agent");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        info!(
            agent_id = %registered.id,
            cluster_id = %registered.cluster_id,
            "agent registered"
        );

        if let Some(reply) = message.reply {
            let ack = serde_json::json!({
                "status": "registered",
                "agent_id": registered.id,
            });
            match serde_json::to_vec(&ack) {
                Ok(payload) => {
                    if let Err(e) = self.bus.publish(&reply, payload).await {
                        error!(error = %e, "failed to send register ack");
                    } else {
                        self.messages_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => error!(error = %e, "failed to marshal register ack"),
            }
        }
    }

    async fn handle_heartbeat(self: Arc<Self>, message: BusMessage) {
        let heartbeat: Heartbeat = match serde_json::from_slice(&message.payload) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                error!(error = %e, "failed to decode heartbeat message");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let Err(e) = self.registry.update_heartbeat(&heartbeat.agent_id).await {
            warn!(agent_id = %heartbeat.agent_id, error = %e, "failed to update heartbeat");
            self.error_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        debug!(
            agent_id = %heartbeat.agent_id,
            cluster_id = %heartbeat.cluster_id,
            "heartbeat received"
        );
    }

    async fn handle_event(self: Arc<Self>, message: BusMessage) {
        let event: Event = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to decode event message");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let event_id = event.id.clone();
        if let Err(e) = self.pipeline.process(event).await {
            error!(event_id = %event_id, error = %e, "failed to process event");
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Metrics are decoded and counted but not forwarded; the storage path
    /// is an integration hook.
    async fn handle_metrics(self: Arc<Self>, message: BusMessage) {
        let metrics: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(error = %e, "failed to decode metrics message");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let cluster_id = metrics
            .get("cluster_id")
            .and_then(|v| v.as_str())
            .or_else(|| subjects::cluster_id(&message.subject))
            .unwrap_or("");
        debug!(cluster_id = %cluster_id, "metrics received");
    }

    async fn handle_result(self: Arc<Self>, message: BusMessage) {
        let result: CommandResult = match serde_json::from_slice(&message.payload) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "failed to decode result message");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let command_id = result.command_id.clone();
        if let Err(e) = self.dispatcher.handle_result(result).await {
            error!(command_id = %command_id, error = %e, "failed to process command result");
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn keepalive_monitor(&self) {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if !self.bus.is_connected() {
                        warn!("bus connection lost, client is reconnecting");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::RegistryConfig;
    use crate::domain::event::EventSeverity;
    use crate::domain::repository::{
        CacheStore, ClusterRepository, CommandRepository, EventRepository,
    };
    use crate::infrastructure::bus::memory::InMemoryBus;
    use crate::infrastructure::memory_cache::InMemoryCache;
    use crate::infrastructure::repositories::memory::{
        InMemoryAgentRepository, InMemoryClusterRepository, InMemoryCommandRepository,
        InMemoryEventRepository,
    };

    struct Fixture {
        bus: Arc<InMemoryBus>,
        registry: Arc<AgentRegistry>,
        events: Arc<InMemoryEventRepository>,
        router: Arc<BusRouter>,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        let cache = Arc::new(InMemoryCache::new());
        let registry = Arc::new(AgentRegistry::new(
            Arc::new(InMemoryAgentRepository::new()),
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            RegistryConfig::default(),
        ));
        let events = Arc::new(InMemoryEventRepository::new());
        let pipeline = Arc::new(EventPipeline::new(
            Arc::clone(&events) as Arc<dyn EventRepository>,
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            Arc::new(InMemoryClusterRepository::new()) as Arc<dyn ClusterRepository>,
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            EventSeverity::Low,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryCommandRepository::new()) as Arc<dyn CommandRepository>,
            Arc::clone(&registry),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
        ));
        let router = Arc::new(BusRouter::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::clone(&registry),
            pipeline,
            dispatcher,
        ));
        router.start().await.unwrap();
        Fixture {
            bus,
            registry,
            events,
            router,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_register_message_registers_and_replies() {
        let f = fixture().await;

        let response = f
            .bus
            .request(
                "aetherius.agent.c1.register",
                serde_json::to_vec(&serde_json::json!({ "id": "a1", "cluster_id": "c1" }))
                    .unwrap(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let ack: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(ack["status"], "registered");
        assert_eq!(ack["agent_id"], "a1");

        let agent = f.registry.get("a1").await.unwrap().unwrap();
        assert!(agent.is_online());
        f.router.stop();
    }

    #[tokio::test]
    async fn test_heartbeat_message_updates_registry() {
        let f = fixture().await;
        f.registry
            .register(
                serde_json::from_value(serde_json::json!({ "id": "a1", "cluster_id": "c1" }))
                    .unwrap(),
            )
            .await
            .unwrap();
        let before = f.registry.get("a1").await.unwrap().unwrap().last_heartbeat;

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.bus
            .publish(
                "aetherius.agent.c1.heartbeat",
                serde_json::to_vec(&serde_json::json!({
                    "agent_id": "a1",
                    "cluster_id": "c1",
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        settle().await;

        let after = f.registry.get("a1").await.unwrap().unwrap().last_heartbeat;
        assert!(after > before);
        f.router.stop();
    }

    #[tokio::test]
    async fn test_event_message_reaches_pipeline() {
        let f = fixture().await;

        f.bus
            .publish(
                "aetherius.agent.c1.event",
                serde_json::to_vec(&serde_json::json!({
                    "id": "e1",
                    "cluster_id": "c1",
                    "severity": "high",
                    "reason": "BackOff",
                    "labels": { "name": "p1" },
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(f.events.all().len(), 1);
        f.router.stop();
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped_and_counted() {
        let f = fixture().await;

        f.bus
            .publish("aetherius.agent.c1.event", b"not json".to_vec())
            .await
            .unwrap();
        settle().await;

        assert!(f.events.all().is_empty());
        assert_eq!(f.router.statistics()["error_count"], 1);
        f.router.stop();
    }
}
