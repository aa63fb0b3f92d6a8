// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Internal-event Subscriber
//!
//! Consumes classified events from `internal.event.critical` and
//! `internal.event.anomaly` and drives the strategy matcher. An event with
//! no matching strategy is logged and dropped.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{subjects, BusError, BusMessage, MessageBus};
use crate::application::strategy_matcher::{MatchError, StrategyMatcher};
use crate::domain::event::InternalEvent;

pub struct InternalEventSubscriber {
    bus: Arc<dyn MessageBus>,
    matcher: Arc<StrategyMatcher>,
    shutdown: CancellationToken,
}

impl InternalEventSubscriber {
    pub fn new(bus: Arc<dyn MessageBus>, matcher: Arc<StrategyMatcher>) -> Self {
        Self {
            bus,
            matcher,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), BusError> {
        info!("starting internal event subscriber");
        self.spawn_consumer(subjects::INTERNAL_CRITICAL).await?;
        self.spawn_consumer(subjects::INTERNAL_ANOMALY).await?;
        info!("internal event subscriber started");
        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping internal event subscriber");
        self.shutdown.cancel();
    }

    async fn spawn_consumer(self: &Arc<Self>, subject: &str) -> Result<(), BusError> {
        let mut subscription = self.bus.subscribe(subject).await?;
        info!(subject = %subject, "subscribed");

        let subscriber = Arc::clone(self);
        let subject = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = subscriber.shutdown.cancelled() => return,
                    message = subscription.recv() => match message {
                        Some(message) => subscriber.handle_message(message).await,
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

    async fn handle_message(&self, message: BusMessage) {
        let event: InternalEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to decode internal event");
                return;
            }
        };

        info!(
            event_type = event.r#type.as_str(),
            cluster_id = %event.cluster_id,
            severity = %event.severity,
            "received internal event"
        );

        let strategy = match self.matcher.match_strategy(&event).await {
            Ok(strategy) => strategy,
            Err(MatchError::NoMatch) => {
                warn!(
                    event_type = event.r#type.as_str(),
                    cluster_id = %event.cluster_id,
                    "no strategy matched for event"
                );
                return;
            }
            Err(e) => {
                error!(error = %e, "strategy matching failed");
                return;
            }
        };

        match self.matcher.execute_strategy(&strategy, &event).await {
            Ok(execution) => {
                info!(
                    strategy_id = %strategy.id,
                    execution_id = %execution.id,
                    "strategy execution started"
                );
            }
            Err(e) => {
                error!(strategy_id = %strategy.id, error = %e, "failed to execute strategy");
            }
        }
    }
}
