// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP clients for the workflow engine's external collaborators.
//!
//! Anti-corruption adapters over the agent-manager command REST surface and
//! the reasoning service.

use async_trait::async_trait;
use std::time::Duration;

use crate::application::step_executor::{AnalysisApi, CommandApi, StepError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatches commands via `POST /api/v1/commands` and polls
/// `GET /api/v1/commands/<id>/result`.
pub struct HttpCommandApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCommandApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CommandApi for HttpCommandApi {
    async fn dispatch(&self, request: serde_json::Value) -> Result<serde_json::Value, StepError> {
        let response = self
            .client
            .post(format!("{}/api/v1/commands", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| StepError::Upstream(format!("failed to send command: {e}")))?;

        if !response.status().is_success() {
            return Err(StepError::Upstream(format!(
                "command dispatch failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StepError::Upstream(format!("failed to decode dispatch response: {e}")))
    }

    async fn fetch_result(
        &self,
        command_id: &str,
    ) -> Result<Option<serde_json::Value>, StepError> {
        let url = format!("{}/api/v1/commands/{}/result", self.base_url, command_id);
        // Not-ready and transient errors both read as "poll again".
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(_) => return Ok(None),
        };
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(response.json().await.ok())
    }
}

/// Synchronous root-cause analysis via
/// `POST /api/v1/analyze/root-cause`.
pub struct ReasoningClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReasoningClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AnalysisApi for ReasoningClient {
    async fn analyze(&self, request: serde_json::Value) -> Result<serde_json::Value, StepError> {
        let response = self
            .client
            .post(format!("{}/api/v1/analyze/root-cause", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| StepError::Upstream(format!("failed to request analysis: {e}")))?;

        if !response.status().is_success() {
            return Err(StepError::Upstream(format!(
                "analysis request failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StepError::Upstream(format!("failed to decode analysis response: {e}")))
    }
}
