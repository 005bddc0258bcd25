//! Outbound publishing and transactions.
//!
//! In atomic mode every publish is sent and committed on its own. With atomic
//! mode off and automatic callbacks off, `publish_begin()` /
//! `publish_commit()` / `publish_rollback()` group publishes into one broker
//! transaction.

use super::{LiveSession, DEFAULT_PULSE_EXPIRY};
use crate::broker::{Broker, DeliveryMode, MessageProperties};
use crate::config::ConfigError;
use crate::control::ControlPlane;
use crate::error::{LiveError, LiveResult, TransportError};
use crate::sink::ObservationSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldlink_core::RoutingKey;
use fieldlink_types::{CommandResponse, Observation, ObservationBatch, Pulse, DEVICE_PULSE_ID};
use serde::Serialize;
use std::time::Duration;

impl<C: ControlPlane, B: Broker> LiveSession<C, B> {
    /// Publish one observation (transient).
    pub async fn publish_observation(
        &self,
        observation_id: i32,
        observation: &Observation,
    ) -> LiveResult<()> {
        self.publish(
            RoutingKey::observation(self.mid(), observation_id),
            MessageProperties::json(DeliveryMode::Transient),
            observation,
        )
        .await
    }

    /// Publish an already encoded observation body (transient), unchanged.
    ///
    /// For values the caller encodes itself, such as binary observations.
    pub async fn publish_observation_raw(
        &self,
        observation_id: i32,
        body: &[u8],
    ) -> LiveResult<()> {
        self.publish_bytes(
            RoutingKey::observation(self.mid(), observation_id),
            MessageProperties::json(DeliveryMode::Transient),
            body,
        )
        .await
    }

    /// Publish every observation of a batch, in order. Stops at the first
    /// failure; earlier observations stay published.
    pub async fn publish_observation_batch(&self, batch: &ObservationBatch) -> LiveResult<usize> {
        let mut published = 0;
        for (observation_id, observation) in batch.iter() {
            self.publish_observation(observation_id, observation).await?;
            published += 1;
        }
        Ok(published)
    }

    /// Publish a command response (persistent).
    pub async fn publish_command_response(&self, response: &CommandResponse) -> LiveResult<()> {
        self.publish(
            RoutingKey::command_response(self.mid(), response.id),
            MessageProperties::json(DeliveryMode::Persistent),
            response,
        )
        .await
    }

    /// Send a device pulse (transient).
    ///
    /// `timestamp` defaults to now. `expiry` defaults to
    /// [`DEFAULT_PULSE_EXPIRY`]; `Some(Duration::ZERO)` sends without expiry.
    pub async fn send_pulse(
        &self,
        timestamp: Option<DateTime<Utc>>,
        expiry: Option<Duration>,
    ) -> LiveResult<()> {
        let pulse = Pulse {
            timestamp: timestamp.unwrap_or_else(Utc::now),
            mid: self.mid().to_string(),
            pulse_id: DEVICE_PULSE_ID,
        };

        let mut properties = MessageProperties::json(DeliveryMode::Transient);
        let expiry = expiry.unwrap_or(DEFAULT_PULSE_EXPIRY);
        if !expiry.is_zero() {
            properties = properties.with_expiration(expiry);
        }

        self.publish(
            RoutingKey::pulse(self.mid(), DEVICE_PULSE_ID),
            properties,
            &pulse,
        )
        .await
    }

    async fn publish<T: Serialize + Sync>(
        &self,
        routing_key: RoutingKey,
        properties: MessageProperties,
        message: &T,
    ) -> LiveResult<()> {
        let body =
            serde_json::to_vec(message).map_err(|e| LiveError::Serialization(e.to_string()))?;
        self.publish_bytes(routing_key, properties, &body).await
    }

    async fn publish_bytes(
        &self,
        routing_key: RoutingKey,
        properties: MessageProperties,
        body: &[u8],
    ) -> LiveResult<()> {
        let routing_key = routing_key.to_string();

        let core = self.core.lock().await;
        if self.config.atomic_transactions && core.transaction_open {
            return Err(ConfigError::PublishDuringTransaction.into());
        }
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel
            .publish(&self.exchange, &routing_key, &properties, body)
            .await?;
        tracing::debug!("Published {} ({} bytes)", routing_key, body.len());
        Ok(())
    }

    /// Open a broker transaction.
    ///
    /// # Errors
    ///
    /// `ConfigError::TransactionsWithAutomaticCallbacks` whenever automatic
    /// callbacks are enabled, connected or not.
    pub async fn publish_begin(&self) -> LiveResult<()> {
        self.ensure_manual_dispatch()?;
        let mut core = self.core.lock().await;
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel.tx_select().await?;
        core.transaction_open = true;
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn publish_commit(&self) -> LiveResult<()> {
        self.ensure_manual_dispatch()?;
        let mut core = self.core.lock().await;
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel.tx_commit().await?;
        core.transaction_open = false;
        Ok(())
    }

    /// Discard the open transaction.
    pub async fn publish_rollback(&self) -> LiveResult<()> {
        self.ensure_manual_dispatch()?;
        let mut core = self.core.lock().await;
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel.tx_rollback().await?;
        core.transaction_open = false;
        Ok(())
    }

    fn ensure_manual_dispatch(&self) -> LiveResult<()> {
        if self.config.automatic_callbacks {
            Err(ConfigError::TransactionsWithAutomaticCallbacks.into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<C: ControlPlane, B: Broker> ObservationSink for LiveSession<C, B> {
    async fn is_reachable(&self) -> bool {
        self.is_connected().await
    }

    async fn deliver(&self, batch: &ObservationBatch) -> Result<(), TransportError> {
        match self.publish_observation_batch(batch).await {
            Ok(_) => Ok(()),
            Err(LiveError::Transport(e)) => Err(e),
            Err(LiveError::NotConnected) => Err(TransportError::NotConnected),
            Err(e) => Err(TransportError::PublishFailed(e.to_string())),
        }
    }
}
