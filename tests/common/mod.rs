// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared test harness: the full control plane wired over in-memory
//! adapters, with a recording stub for the reasoning service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aetherius_control_plane::application::dispatcher::CommandDispatcher;
use aetherius_control_plane::application::event_pipeline::EventPipeline;
use aetherius_control_plane::application::registry::{AgentRegistry, RegistryConfig};
use aetherius_control_plane::application::step_executor::{
    AnalysisApi, CommandApi, StepError, StepExecutor,
};
use aetherius_control_plane::application::strategy_matcher::StrategyMatcher;
use aetherius_control_plane::application::workflow_engine::WorkflowEngine;
use aetherius_control_plane::domain::event::EventSeverity;
use aetherius_control_plane::domain::repository::{
    AgentRepository, CacheStore, ClusterRepository, CommandRepository, EventRepository,
    ExecutionRepository, StrategyRepository, WorkflowRepository,
};
use aetherius_control_plane::infrastructure::bus::memory::InMemoryBus;
use aetherius_control_plane::infrastructure::bus::router::BusRouter;
use aetherius_control_plane::infrastructure::bus::subscriber::InternalEventSubscriber;
use aetherius_control_plane::infrastructure::bus::MessageBus;
use aetherius_control_plane::infrastructure::memory_cache::InMemoryCache;
use aetherius_control_plane::infrastructure::repositories::memory::{
    InMemoryAgentRepository, InMemoryClusterRepository, InMemoryCommandRepository,
    InMemoryEventRepository, InMemoryExecutionRepository, InMemoryStrategyRepository,
    InMemoryWorkflowRepository,
};

/// Reasoning-service stub: counts calls, optionally fails the first N, then
/// reports an OOM root cause.
pub struct RecordingAnalysisApi {
    pub calls: AtomicU32,
    fail_first: AtomicU32,
}

#[async_trait]
impl AnalysisApi for RecordingAnalysisApi {
    async fn analyze(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StepError::Upstream("reasoning service unavailable".into()));
        }
        Ok(serde_json::json!({ "root_cause": "OOM", "confidence": 0.92 }))
    }
}

/// Command API stub for workflow command steps; unused in most scenarios.
pub struct NullCommandApi;

#[async_trait]
impl CommandApi for NullCommandApi {
    async fn dispatch(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
        Err(StepError::Upstream("no command api in this harness".into()))
    }

    async fn fetch_result(&self, _: &str) -> Result<Option<serde_json::Value>, StepError> {
        Ok(None)
    }
}

pub struct Harness {
    pub bus: Arc<InMemoryBus>,
    pub cache: Arc<InMemoryCache>,
    pub agent_store: Arc<InMemoryAgentRepository>,
    pub event_store: Arc<InMemoryEventRepository>,
    pub command_store: Arc<InMemoryCommandRepository>,
    pub workflow_store: Arc<InMemoryWorkflowRepository>,
    pub execution_store: Arc<InMemoryExecutionRepository>,
    pub strategy_store: Arc<InMemoryStrategyRepository>,
    pub registry: Arc<AgentRegistry>,
    pub pipeline: Arc<EventPipeline>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub engine: Arc<WorkflowEngine>,
    pub router: Arc<BusRouter>,
    pub subscriber: Arc<InternalEventSubscriber>,
    pub analysis: Arc<RecordingAnalysisApi>,
}

impl Harness {
    pub fn stop(&self) {
        self.subscriber.stop();
        self.router.stop();
        self.engine.stop();
        self.dispatcher.stop();
        self.registry.stop();
    }
}

pub async fn start_harness(registry_config: RegistryConfig, analysis_fail_first: u32) -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let cache = Arc::new(InMemoryCache::new());
    let agent_store = Arc::new(InMemoryAgentRepository::new());
    let event_store = Arc::new(InMemoryEventRepository::new());
    let command_store = Arc::new(InMemoryCommandRepository::new());
    let workflow_store = Arc::new(InMemoryWorkflowRepository::new());
    let execution_store = Arc::new(InMemoryExecutionRepository::new());
    let strategy_store = Arc::new(InMemoryStrategyRepository::new());
    let clusters = Arc::new(InMemoryClusterRepository::new());

    let registry = Arc::new(AgentRegistry::new(
        Arc::clone(&agent_store) as Arc<dyn AgentRepository>,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        registry_config,
    ));
    let pipeline = Arc::new(EventPipeline::new(
        Arc::clone(&event_store) as Arc<dyn EventRepository>,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        clusters as Arc<dyn ClusterRepository>,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        EventSeverity::Low,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&command_store) as Arc<dyn CommandRepository>,
        Arc::clone(&registry),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
    ));

    let analysis = Arc::new(RecordingAnalysisApi {
        calls: AtomicU32::new(0),
        fail_first: AtomicU32::new(analysis_fail_first),
    });
    let executor = Arc::new(StepExecutor::new(
        Arc::new(NullCommandApi),
        Arc::clone(&analysis) as Arc<dyn AnalysisApi>,
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&workflow_store) as Arc<dyn WorkflowRepository>,
        Arc::clone(&execution_store) as Arc<dyn ExecutionRepository>,
        executor,
    ));
    let matcher = Arc::new(StrategyMatcher::new(
        Arc::clone(&strategy_store) as Arc<dyn StrategyRepository>,
        Arc::clone(&engine),
    ));

    let router = Arc::new(BusRouter::new(
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        Arc::clone(&registry),
        Arc::clone(&pipeline),
        Arc::clone(&dispatcher),
    ));
    let subscriber = Arc::new(InternalEventSubscriber::new(
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        matcher,
    ));

    registry.start().await.unwrap();
    router.start().await.unwrap();
    subscriber.start().await.unwrap();

    Harness {
        bus,
        cache,
        agent_store,
        event_store,
        command_store,
        workflow_store,
        execution_store,
        strategy_store,
        registry,
        pipeline,
        dispatcher,
        engine,
        router,
        subscriber,
        analysis,
    }
}
