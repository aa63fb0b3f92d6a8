// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Registry (Application Service)
//!
//! Heartbeat-driven presence tracking across three tiers: the in-process map
//! is the hot tier, the cache holds agent JSON (30 m) plus a short presence
//! key (2 m), and the durable store is the source of truth on restart.
//!
//! Two background sweepers run while the registry is started:
//! - the heartbeat sweeper marks online agents offline once their last
//!   heartbeat is older than the heartbeat timeout (it never deletes)
//! - the cleanup sweeper deletes agents that stayed offline longer than the
//!   cleanup threshold from store, cache and memory

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::{Agent, AgentStatus, ConnectionInfo};
use crate::domain::repository::{AgentRepository, CacheStore, RepositoryError};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// An online agent with no heartbeat for this long is swept offline.
    pub heartbeat_timeout: Duration,
    /// Interval of both sweepers.
    pub sweep_interval: Duration,
    /// An offline agent with no heartbeat for this long is deleted.
    pub cleanup_threshold: Duration,
    pub agent_cache_ttl: Duration,
    pub presence_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            // 2x the agent heartbeat interval
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            cleanup_threshold: Duration::from_secs(24 * 60 * 60),
            agent_cache_ttl: Duration::from_secs(30 * 60),
            presence_ttl: Duration::from_secs(2 * 60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Tri-tier agent registry with liveness sweepers.
pub struct AgentRegistry {
    store: Arc<dyn AgentRepository>,
    cache: Arc<dyn CacheStore>,
    config: RegistryConfig,
    agents: RwLock<HashMap<String, Agent>>,
    shutdown: CancellationToken,

    registration_count: AtomicU64,
    heartbeat_count: AtomicU64,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn AgentRepository>,
        cache: Arc<dyn CacheStore>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            agents: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            registration_count: AtomicU64::new(0),
            heartbeat_count: AtomicU64::new(0),
        }
    }

    /// Load known agents from the store and start the sweepers.
    pub async fn start(self: &Arc<Self>) -> Result<(), RegistryError> {
        info!("starting agent registry");
        self.load_agents().await?;

        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.run_heartbeat_sweeper().await });

        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.run_cleanup_sweeper().await });

        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping agent registry");
        self.shutdown.cancel();
    }

    /// Register a new agent or refresh an existing registration.
    ///
    /// Idempotent per cluster id: an existing registration keeps its id and
    /// `registered_at`; status and heartbeat are refreshed either way.
    pub async fn register(&self, mut agent: Agent) -> Result<Agent, RegistryError> {
        if agent.cluster_id.is_empty() {
            return Err(RegistryError::Validation("cluster_id is required".into()));
        }

        let now = Utc::now();
        agent.status = AgentStatus::Online;
        agent.last_heartbeat = now;
        agent.updated_at = now;

        match self.store.find_by_cluster_id(&agent.cluster_id).await? {
            Some(existing) => {
                agent.id = existing.id;
                agent.registered_at = existing.registered_at;
                info!(agent_id = %agent.id, cluster_id = %agent.cluster_id, "agent re-registered");
            }
            None => {
                agent.registered_at = now;
                let info = agent.connection_info.get_or_insert_with(ConnectionInfo::default);
                info.connected_at = Some(now);
                info.last_seen = Some(now);
                self.registration_count.fetch_add(1, Ordering::Relaxed);
                info!(agent_id = %agent.id, cluster_id = %agent.cluster_id, "new agent registered");
            }
        }

        self.store.save(&agent).await?;

        if let Err(e) = self.cache.cache_agent(&agent, self.config.agent_cache_ttl).await {
            warn!(error = %e, "failed to cache agent");
        }
        if let Err(e) = self.cache.set_agent_online(&agent.id, self.config.presence_ttl).await {
            warn!(error = %e, "failed to set agent online");
        }

        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());

        Ok(agent)
    }

    /// Mark an agent offline and drop its cache entry. The presence key
    /// expires on its own.
    pub async fn unregister(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.store
            .update_status(agent_id, AgentStatus::Offline)
            .await?;

        if let Err(e) = self.cache.delete_cached_agent(agent_id).await {
            warn!(error = %e, "failed to drop cached agent");
        }

        self.agents.write().await.remove(agent_id);
        info!(agent_id = %agent_id, "agent unregistered");
        Ok(())
    }

    /// Record a heartbeat: store, memory and presence TTL. An agent that was
    /// swept offline is promoted back to online.
    pub async fn update_heartbeat(&self, agent_id: &str) -> Result<(), RegistryError> {
        let now = Utc::now();
        self.store.update_heartbeat(agent_id, now).await?;

        if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
            agent.touch(now);
        }

        if let Err(e) = self.cache.set_agent_online(agent_id, self.config.presence_ttl).await {
            warn!(error = %e, "failed to refresh presence key");
        }

        self.heartbeat_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Lookup through the tiers, populating warmer tiers on miss.
    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, RegistryError> {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            return Ok(Some(agent.clone()));
        }

        match self.cache.get_cached_agent(agent_id).await {
            Ok(Some(agent)) => {
                self.agents
                    .write()
                    .await
                    .insert(agent.id.clone(), agent.clone());
                return Ok(Some(agent));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read agent from cache"),
        }

        match self.store.find_by_id(agent_id).await? {
            Some(agent) => {
                self.agents
                    .write()
                    .await
                    .insert(agent.id.clone(), agent.clone());
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    /// Resolve the agent serving a cluster, memory first.
    pub async fn get_by_cluster_id(&self, cluster_id: &str) -> Result<Option<Agent>, RegistryError> {
        if let Some(agent) = self
            .agents
            .read()
            .await
            .values()
            .find(|a| a.cluster_id == cluster_id)
        {
            return Ok(Some(agent.clone()));
        }
        Ok(self.store.find_by_cluster_id(cluster_id).await?)
    }

    /// Unfiltered listings come from memory; filtered ones hit the store.
    pub async fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, RegistryError> {
        match status {
            None => Ok(self.agents.read().await.values().cloned().collect()),
            Some(_) => Ok(self.store.list(status).await?),
        }
    }

    pub async fn statistics(&self) -> serde_json::Value {
        let agents = self.agents.read().await;
        let online = agents.values().filter(|a| a.is_online()).count();
        serde_json::json!({
            "total_agents": agents.len(),
            "online_agents": online,
            "offline_agents": agents.len() - online,
            "registration_count": self.registration_count.load(Ordering::Relaxed),
            "heartbeat_count": self.heartbeat_count.load(Ordering::Relaxed),
            "heartbeat_timeout_secs": self.config.heartbeat_timeout.as_secs(),
        })
    }

    async fn load_agents(&self) -> Result<(), RegistryError> {
        let known = self.store.list(None).await?;
        let mut agents = self.agents.write().await;
        for agent in known {
            agents.insert(agent.id.clone(), agent);
        }
        info!(count = agents.len(), "loaded agents from store");
        Ok(())
    }

    async fn run_heartbeat_sweeper(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.sweep_heartbeats().await,
            }
        }
    }

    /// Transition agents with stale heartbeats to offline. Never deletes.
    async fn sweep_heartbeats(&self) {
        let now = Utc::now();
        let mut stale = Vec::new();
        {
            let mut agents = self.agents.write().await;
            for (id, agent) in agents.iter_mut() {
                let silent_for = (now - agent.last_heartbeat)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if agent.is_online() && silent_for > self.config.heartbeat_timeout {
                    warn!(
                        agent_id = %id,
                        cluster_id = %agent.cluster_id,
                        silent_secs = silent_for.as_secs(),
                        "agent heartbeat timeout"
                    );
                    agent.status = AgentStatus::Offline;
                    agent.updated_at = now;
                    stale.push(id.clone());
                }
            }
        }
        for id in stale {
            if let Err(e) = self.store.update_status(&id, AgentStatus::Offline).await {
                error!(agent_id = %id, error = %e, "failed to persist offline status");
            }
        }
    }

    async fn run_cleanup_sweeper(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.sweep_stale_agents().await,
            }
        }
    }

    /// Delete agents that have been offline past the cleanup threshold.
    async fn sweep_stale_agents(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .agents
            .read()
            .await
            .values()
            .filter(|agent| {
                agent.status == AgentStatus::Offline
                    && (now - agent.last_heartbeat)
                        .to_std()
                        .map(|d| d > self.config.cleanup_threshold)
                        .unwrap_or(false)
            })
            .map(|agent| agent.id.clone())
            .collect();

        for id in expired {
            info!(agent_id = %id, "cleaning up stale agent");
            if let Err(e) = self.store.delete(&id).await {
                error!(agent_id = %id, error = %e, "failed to delete stale agent");
                continue;
            }
            if let Err(e) = self.cache.delete_cached_agent(&id).await {
                warn!(agent_id = %id, error = %e, "failed to drop cached agent");
            }
            self.agents.write().await.remove(&id);
            debug!(agent_id = %id, "stale agent removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_cache::InMemoryCache;
    use crate::infrastructure::repositories::memory::InMemoryAgentRepository;

    fn wire_payload(id: &str, cluster_id: &str) -> Agent {
        serde_json::from_value(serde_json::json!({ "id": id, "cluster_id": cluster_id })).unwrap()
    }

    fn registry(config: RegistryConfig) -> Arc<AgentRegistry> {
        Arc::new(AgentRegistry::new(
            Arc::new(InMemoryAgentRepository::new()),
            Arc::new(InMemoryCache::new()),
            config,
        ))
    }

    #[tokio::test]
    async fn test_register_requires_cluster_id() {
        let registry = registry(RegistryConfig::default());
        let err = registry
            .register(wire_payload("a1", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_cluster() {
        let registry = registry(RegistryConfig::default());

        let first = registry
            .register(wire_payload("a1", "c1"))
            .await
            .unwrap();

        // Re-register with a different agent-supplied id; identity from the
        // first registration wins.
        let second = registry
            .register(wire_payload("a2", "c1"))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.registered_at, first.registered_at);
        assert!(second.is_online());

        let listed = registry.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_promotes_offline_agent() {
        let registry = registry(RegistryConfig::default());
        let agent = registry
            .register(wire_payload("a1", "c1"))
            .await
            .unwrap();

        registry.agents.write().await.get_mut(&agent.id).unwrap().status =
            AgentStatus::Offline;

        registry.update_heartbeat(&agent.id).await.unwrap();
        let fetched = registry.get(&agent.id).await.unwrap().unwrap();
        assert!(fetched.is_online());
    }

    #[tokio::test]
    async fn test_get_falls_back_to_store() {
        let registry = registry(RegistryConfig::default());
        let agent = registry
            .register(wire_payload("a1", "c1"))
            .await
            .unwrap();

        // Drop the hot tiers; the store still has it.
        registry.agents.write().await.clear();
        registry.cache.delete_cached_agent(&agent.id).await.unwrap();

        let fetched = registry.get(&agent.id).await.unwrap();
        assert!(fetched.is_some());
        // Memory tier repopulated.
        assert!(registry.agents.read().await.contains_key(&agent.id));
    }

    #[tokio::test]
    async fn test_heartbeat_sweeper_marks_offline() {
        // Sweepers compare wall-clock heartbeats, so this test uses short
        // real durations instead of the paused test clock.
        let config = RegistryConfig {
            heartbeat_timeout: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(50),
            ..RegistryConfig::default()
        };
        let registry = registry(config);
        let agent = registry
            .register(wire_payload("a1", "c1"))
            .await
            .unwrap();
        registry.start().await.unwrap();

        // No heartbeat past the timeout; a sweep tick flips it offline.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let fetched = registry.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Offline);
        registry.stop();
    }

    #[tokio::test]
    async fn test_cleanup_sweeper_deletes_long_offline() {
        let config = RegistryConfig {
            heartbeat_timeout: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(25),
            cleanup_threshold: Duration::from_millis(150),
            ..RegistryConfig::default()
        };
        let registry = registry(config);
        let agent = registry
            .register(wire_payload("a1", "c1"))
            .await
            .unwrap();
        registry.start().await.unwrap();

        // Swept offline first, then deleted once past the cleanup threshold.
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(registry.get(&agent.id).await.unwrap().is_none());
        registry.stop();
    }
}
