// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end workflow triggering: a critical event fans out on the internal
//! bus, matches a strategy and drives the workflow engine against the
//! reasoning-service stub.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aetherius_control_plane::application::registry::RegistryConfig;
use aetherius_control_plane::domain::event::InternalEvent;
use aetherius_control_plane::infrastructure::bus::MessageBus;
use aetherius_control_plane::domain::strategy::{Strategy, Symptom};
use aetherius_control_plane::domain::workflow::{ExecutionStatus, Workflow, WorkflowStatus};
use aetherius_control_plane::domain::repository::{StrategyRepository, WorkflowRepository};
use chrono::Utc;
use common::{start_harness, Harness};

fn oom_strategy(workflow_id: &str) -> Strategy {
    Strategy {
        id: "s-oom".into(),
        name: "oom-diagnosis".into(),
        category: "pod_failure".into(),
        description: String::new(),
        symptoms: vec![Symptom {
            r#type: "event".into(),
            pattern: "OOMKilling".into(),
            conditions: HashMap::new(),
        }],
        workflow_id: workflow_id.into(),
        priority: 10,
        enabled: true,
        metadata: HashMap::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn analysis_workflow(id: &str, retry: bool) -> Workflow {
    let retry_policy = if retry {
        serde_json::json!({
            "max_retries": 2,
            "initial_delay": "100ms",
            "max_delay": "1s",
            "backoff_factor": 2.0
        })
    } else {
        serde_json::Value::Null
    };
    let mut step = serde_json::json!({
        "id": "analyze",
        "type": "ai_analysis",
        "config": { "analysis_type": "root_cause" },
    });
    if retry {
        step["retry_policy"] = retry_policy;
    }
    let mut workflow: Workflow = serde_json::from_value(serde_json::json!({
        "id": id,
        "name": "oom-diagnosis",
        "trigger_type": "event",
        "steps": [step],
    }))
    .unwrap();
    workflow.status = WorkflowStatus::Active;
    workflow
}

async fn publish_oom_event(h: &Harness) {
    h.bus
        .publish(
            "aetherius.agent.c1.event",
            serde_json::to_vec(&serde_json::json!({
                "id": "e1",
                "cluster_id": "c1",
                "severity": "high",
                "reason": "OOMKilling",
                "namespace": "default",
                "labels": { "name": "api-pod" },
            }))
            .unwrap(),
        )
        .await
        .unwrap();
}

async fn wait_for_terminal_execution(h: &Harness) -> aetherius_control_plane::domain::workflow::WorkflowExecution {
    for _ in 0..200 {
        if let Some(execution) = h.execution_store.all().into_iter().next() {
            if execution.is_terminal() {
                return execution;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no terminal workflow execution");
}

#[tokio::test]
async fn test_critical_event_triggers_matched_workflow() {
    let h = start_harness(RegistryConfig::default(), 0).await;
    h.workflow_store
        .save(&analysis_workflow("w-oom", false))
        .await
        .unwrap();
    h.strategy_store.save(&oom_strategy("w-oom")).await.unwrap();

    let mut internal_sub = h.bus.subscribe("internal.event.critical").await.unwrap();

    publish_oom_event(&h).await;

    // The pipeline republished the event internally.
    let internal_msg = internal_sub.recv().await.unwrap();
    let internal: InternalEvent = serde_json::from_slice(&internal_msg.payload).unwrap();
    assert_eq!(internal.cluster_id, "c1");
    assert_eq!(
        internal.payload.get("reason"),
        Some(&serde_json::json!("OOMKilling"))
    );

    // The subscriber matched the strategy and the engine ran the workflow.
    let execution = wait_for_terminal_execution(&h).await;
    assert_eq!(execution.workflow_id, "w-oom");
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        execution.trigger_event.get("strategy_id"),
        Some(&serde_json::json!("s-oom"))
    );
    assert_eq!(
        execution.context.get("step_analyze_root_cause"),
        Some(&serde_json::json!("OOM"))
    );

    // Exactly one analysis request reached the reasoning stub.
    assert_eq!(h.analysis.calls.load(Ordering::SeqCst), 1);

    h.stop();
}

#[tokio::test]
async fn test_event_without_matching_strategy_is_dropped() {
    let h = start_harness(RegistryConfig::default(), 0).await;
    h.workflow_store
        .save(&analysis_workflow("w-oom", false))
        .await
        .unwrap();
    h.strategy_store.save(&oom_strategy("w-oom")).await.unwrap();

    // Critical reason with no matching symptom pattern.
    h.bus
        .publish(
            "aetherius.agent.c1.event",
            serde_json::to_vec(&serde_json::json!({
                "id": "e1",
                "cluster_id": "c1",
                "severity": "critical",
                "reason": "NodeNotReady",
                "labels": { "name": "node-1" },
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(h.execution_store.all().is_empty());
    assert_eq!(h.analysis.calls.load(Ordering::SeqCst), 0);

    h.stop();
}

#[tokio::test]
async fn test_triggered_workflow_retries_flaky_analysis() {
    // Reasoning stub fails once, then succeeds; the step's retry policy
    // absorbs the failure.
    let h = start_harness(RegistryConfig::default(), 1).await;
    h.workflow_store
        .save(&analysis_workflow("w-oom", true))
        .await
        .unwrap();
    h.strategy_store.save(&oom_strategy("w-oom")).await.unwrap();

    let started_at = std::time::Instant::now();
    publish_oom_event(&h).await;

    let execution = wait_for_terminal_execution(&h).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_executions[0].retry_count, 1);
    assert_eq!(h.analysis.calls.load(Ordering::SeqCst), 2);
    // The backoff sleep of >= 100ms happened between the two attempts.
    assert!(started_at.elapsed() >= Duration::from_millis(100));

    h.stop();
}
