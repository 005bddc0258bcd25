//! Message broker abstraction.
//!
//! The live session talks to an AMQP-style broker through three layered
//! traits that mirror the resource chain it owns:
//!
//! - [`Broker`] opens a [`BrokerConnection`] from [`BrokerParams`]
//! - [`BrokerConnection`] opens a [`BrokerChannel`]
//! - [`BrokerChannel`] publishes, consumes, acknowledges and runs transactions
//!
//! Inbound deliveries from `consume()` arrive on an unbounded channel, so the
//! dispatch engine can drain them from its own task.
//!
//! None of these types are safe to drive from two places at once; the live
//! session serializes every call behind one lock.

mod mock;

#[cfg(feature = "amqp")]
mod amqp;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use mock::{MockBroker, PublishedMessage};

use crate::error::TransportError;
use async_trait::async_trait;
use fieldlink_core::HeartbeatInterval;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything needed to open a broker connection.
#[derive(Clone)]
pub struct BrokerParams {
    /// Broker host.
    pub host: String,
    /// Broker port, already chosen for `use_tls`.
    pub port: u16,
    /// Login name (the device MID).
    pub username: String,
    /// Login password (the pre-shared key).
    pub password: String,
    /// Negotiated heartbeat.
    pub heartbeat: HeartbeatInterval,
    /// Connect with TLS.
    pub use_tls: bool,
    /// Accept invalid TLS certificates.
    pub accept_invalid_certs: bool,
    /// Upper bound for connection setup.
    pub timeout: Duration,
}

impl std::fmt::Debug for BrokerParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("heartbeat", &self.heartbeat)
            .field("use_tls", &self.use_tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    /// Not written to disk by the broker.
    Transient = 1,
    /// Survives a broker restart.
    Persistent = 2,
}

/// Per-message properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    /// MIME type of the body.
    pub content_type: String,
    /// Delivery mode.
    pub delivery_mode: DeliveryMode,
    /// Discard the message if undelivered after this long.
    pub expiration: Option<Duration>,
}

impl MessageProperties {
    /// JSON body with the given delivery mode and no expiry.
    pub fn json(delivery_mode: DeliveryMode) -> Self {
        Self {
            content_type: "application/json".to_string(),
            delivery_mode,
            expiration: None,
        }
    }

    /// Set an expiry.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// One inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Tag used to acknowledge or reject this delivery.
    pub delivery_tag: u64,
    /// Raw body.
    pub body: Vec<u8>,
}

/// Opens broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open and authenticate a connection.
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel on this connection.
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// True while the connection is usable.
    fn is_open(&self) -> bool;

    /// Close the connection. Closing a closed connection is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A channel: the unit of publishing, consuming and transactions.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Limit unacknowledged deliveries to `prefetch_count`.
    async fn qos(&self, prefetch_count: u16) -> Result<(), TransportError>;

    /// Publish one message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), TransportError>;

    /// Start consuming `queue`. Returns the consumer tag and the delivery stream.
    async fn consume(
        &self,
        queue: &str,
    ) -> Result<(String, mpsc::UnboundedReceiver<InboundFrame>), TransportError>;

    /// Stop a consumer. Its delivery stream ends.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    /// Pull one message without a consumer. `None` when the queue is empty.
    async fn get(&self, queue: &str) -> Result<Option<InboundFrame>, TransportError>;

    /// Positively acknowledge one delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    /// Reject one delivery.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;

    /// Put the channel into transactional mode.
    async fn tx_select(&self) -> Result<(), TransportError>;

    /// Commit publishes since the last commit or rollback.
    async fn tx_commit(&self) -> Result<(), TransportError>;

    /// Discard publishes since the last commit or rollback.
    async fn tx_rollback(&self) -> Result<(), TransportError>;

    /// True while the channel is usable.
    fn is_open(&self) -> bool;

    /// Close the channel. Closing a closed channel is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}
