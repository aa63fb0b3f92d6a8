// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strategy Matcher (Application Service)
//!
//! Scores internal events against enabled strategies and launches the
//! best-scoring strategy's workflow. Selection is deterministic: highest
//! score wins, ties break on higher priority, then lexicographic id.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::application::workflow_engine::{EngineError, WorkflowEngine};
use crate::domain::event::InternalEvent;
use crate::domain::repository::{RepositoryError, StrategyRepository};
use crate::domain::strategy::Strategy;
use crate::domain::workflow::WorkflowExecution;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("no matching strategy found")]
    NoMatch,

    #[error(transparent)]
    Store(#[from] RepositoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct StrategyMatcher {
    strategies: Arc<dyn StrategyRepository>,
    engine: Arc<WorkflowEngine>,
}

impl StrategyMatcher {
    pub fn new(strategies: Arc<dyn StrategyRepository>, engine: Arc<WorkflowEngine>) -> Self {
        Self { strategies, engine }
    }

    /// Pick the best strategy for an event, or `NoMatch` when nothing scores
    /// above zero.
    pub async fn match_strategy(&self, event: &InternalEvent) -> Result<Strategy, MatchError> {
        let strategies = self.strategies.list(true).await?;

        let mut best: Option<(i32, Strategy)> = None;
        for strategy in strategies {
            let score = strategy.match_score(event);
            if score <= 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_score, best_strategy)) => {
                    score > *best_score
                        || (score == *best_score
                            && (strategy.priority > best_strategy.priority
                                || (strategy.priority == best_strategy.priority
                                    && strategy.id < best_strategy.id)))
                }
            };
            if better {
                best = Some((score, strategy));
            }
        }

        let (score, strategy) = best.ok_or(MatchError::NoMatch)?;
        info!(
            strategy_id = %strategy.id,
            strategy_name = %strategy.name,
            score,
            "strategy matched"
        );
        Ok(strategy)
    }

    /// Launch the strategy's workflow. Returns promptly; execution continues
    /// asynchronously.
    pub async fn execute_strategy(
        &self,
        strategy: &Strategy,
        event: &InternalEvent,
    ) -> Result<WorkflowExecution, MatchError> {
        info!(
            strategy_id = %strategy.id,
            workflow_id = %strategy.workflow_id,
            "executing strategy"
        );

        let mut trigger_event = HashMap::new();
        trigger_event.insert("strategy_id".to_string(), serde_json::json!(strategy.id));
        trigger_event.insert("event".to_string(), serde_json::json!(event));

        Ok(self
            .engine
            .start_workflow(&strategy.workflow_id, trigger_event)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::step_executor::{AnalysisApi, CommandApi, StepError, StepExecutor};
    use crate::domain::event::Event;
    use crate::domain::strategy::Symptom;
    use crate::domain::repository::WorkflowRepository;
    use crate::domain::workflow::{Workflow, WorkflowStatus};
    use crate::infrastructure::repositories::memory::{
        InMemoryExecutionRepository, InMemoryStrategyRepository, InMemoryWorkflowRepository,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct NullCommandApi;

    #[async_trait]
    impl CommandApi for NullCommandApi {
        async fn dispatch(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
            Err(StepError::Upstream("unused".into()))
        }
        async fn fetch_result(
            &self,
            _: &str,
        ) -> Result<Option<serde_json::Value>, StepError> {
            Ok(None)
        }
    }

    struct NullAnalysisApi;

    #[async_trait]
    impl AnalysisApi for NullAnalysisApi {
        async fn analyze(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
            Ok(serde_json::json!({}))
        }
    }

    fn strategy(id: &str, pattern: &str, priority: i32, workflow_id: &str) -> Strategy {
        Strategy {
            id: id.into(),
            name: id.into(),
            category: "pod_failure".into(),
            description: String::new(),
            symptoms: vec![Symptom {
                r#type: "event".into(),
                pattern: pattern.into(),
                conditions: HashMap::new(),
            }],
            workflow_id: workflow_id.into(),
            priority,
            enabled: true,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn internal_event(reason: &str) -> InternalEvent {
        let event: Event = serde_json::from_value(serde_json::json!({
            "id": "e1",
            "cluster_id": "c1",
            "severity": "critical",
            "reason": reason,
        }))
        .unwrap();
        InternalEvent::critical(&event)
    }

    struct Fixture {
        strategies: Arc<InMemoryStrategyRepository>,
        workflows: Arc<InMemoryWorkflowRepository>,
        matcher: StrategyMatcher,
    }

    fn fixture() -> Fixture {
        let strategies = Arc::new(InMemoryStrategyRepository::new());
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&workflows) as Arc<dyn crate::domain::repository::WorkflowRepository>,
            executions,
            Arc::new(StepExecutor::new(
                Arc::new(NullCommandApi),
                Arc::new(NullAnalysisApi),
            )),
        ));
        let matcher = StrategyMatcher::new(
            Arc::clone(&strategies) as Arc<dyn StrategyRepository>,
            engine,
        );
        Fixture {
            strategies,
            workflows,
            matcher,
        }
    }

    #[tokio::test]
    async fn test_highest_score_wins() {
        let f = fixture();
        f.strategies
            .save(&strategy("s-oom", "OOMKilling", 0, "w1"))
            .await
            .unwrap();
        f.strategies
            .save(&strategy("s-crash", "CrashLoopBackOff", 0, "w2"))
            .await
            .unwrap();

        let matched = f
            .matcher
            .match_strategy(&internal_event("OOMKilling"))
            .await
            .unwrap();
        assert_eq!(matched.id, "s-oom");
    }

    #[tokio::test]
    async fn test_tie_breaks_on_priority_then_id() {
        let f = fixture();
        f.strategies
            .save(&strategy("s-b", "OOMKilling", 5, "w1"))
            .await
            .unwrap();
        f.strategies
            .save(&strategy("s-a", "OOMKilling", 1, "w2"))
            .await
            .unwrap();

        let matched = f
            .matcher
            .match_strategy(&internal_event("OOMKilling"))
            .await
            .unwrap();
        assert_eq!(matched.id, "s-b");

        f.strategies
            .save(&strategy("s-0", "OOMKilling", 5, "w3"))
            .await
            .unwrap();
        let matched = f
            .matcher
            .match_strategy(&internal_event("OOMKilling"))
            .await
            .unwrap();
        assert_eq!(matched.id, "s-0");
    }

    #[tokio::test]
    async fn test_no_match_is_error() {
        let f = fixture();
        f.strategies
            .save(&strategy("s-oom", "OOMKilling", 0, "w1"))
            .await
            .unwrap();

        let err = f
            .matcher
            .match_strategy(&internal_event("NodeNotReady"))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NoMatch));
    }

    #[tokio::test]
    async fn test_disabled_strategies_ignored() {
        let f = fixture();
        let mut disabled = strategy("s-oom", "OOMKilling", 0, "w1");
        disabled.enabled = false;
        f.strategies.save(&disabled).await.unwrap();

        assert!(matches!(
            f.matcher
                .match_strategy(&internal_event("OOMKilling"))
                .await,
            Err(MatchError::NoMatch)
        ));
    }

    #[tokio::test]
    async fn test_execute_strategy_starts_workflow() {
        let f = fixture();
        let mut wf: Workflow = serde_json::from_value(serde_json::json!({
            "id": "w1",
            "name": "oom-diagnosis",
            "steps": [
                { "id": "notify", "type": "notification",
                  "config": { "channel": "oncall", "message": "oom" } },
            ],
        }))
        .unwrap();
        wf.status = WorkflowStatus::Active;
        f.workflows.save(&wf).await.unwrap();

        let strategy = strategy("s-oom", "OOMKilling", 0, "w1");
        let event = internal_event("OOMKilling");
        let execution = f.matcher.execute_strategy(&strategy, &event).await.unwrap();

        assert_eq!(execution.workflow_id, "w1");
        assert_eq!(
            execution.trigger_event.get("strategy_id"),
            Some(&serde_json::json!("s-oom"))
        );
        assert!(execution.trigger_event.contains_key("event"));
    }
}
