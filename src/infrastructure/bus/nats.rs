// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! NATS message bus adapter.
//!
//! Plain core NATS (no JetStream): delivery is at-most-once and messages
//! published while disconnected are lost. The client reconnects on its own
//! with a fixed wait, up to the configured attempt bound; subscriptions
//! resume after reconnect.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{BusError, BusMessage, BusSubscription, MessageBus};
use crate::infrastructure::config::NatsSettings;

const SUBSCRIPTION_BUFFER: usize = 1024;

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(settings: &NatsSettings) -> Result<Self, BusError> {
        let reconnect_wait = settings.reconnect_wait;
        let options = async_nats::ConnectOptions::new()
            .name("aetherius-control-plane")
            .max_reconnects(settings.max_reconnect)
            .reconnect_delay_callback(move |_attempt| reconnect_wait)
            .ping_interval(settings.ping_interval)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("connected to NATS"),
                    async_nats::Event::Disconnected => warn!("disconnected from NATS"),
                    other => debug!(event = %other, "NATS client event"),
                }
            });

        let client = options
            .connect(&settings.url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(url = %settings.url, "connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        let response = tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .map_err(|_| BusError::RequestTimeout)?
        .map_err(|e| BusError::Publish(e.to_string()))?;

        Ok(BusMessage {
            subject: response.subject.to_string(),
            payload: response.payload.to_vec(),
            reply: response.reply.map(|r| r.to_string()),
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, BusError> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pattern = subject.to_string();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let forwarded = BusMessage {
                    subject: message.subject.to_string(),
                    payload: message.payload.to_vec(),
                    reply: message.reply.map(|r| r.to_string()),
                };
                if sender.send(forwarded).await.is_err() {
                    // Receiver dropped; let the NATS subscription unwind.
                    return;
                }
            }
            error!(subject = %pattern, "NATS subscription closed");
        });

        Ok(BusSubscription::new(receiver))
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}
