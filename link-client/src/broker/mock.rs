//! Mock broker for testing.
//!
//! Records everything published, acknowledged and torn down, queues inbound
//! messages for `get()` or pushes them to an active consumer, and can be told
//! to fail or to drop the connection.

use super::{
    Broker, BrokerChannel, BrokerConnection, BrokerParams, InboundFrame, MessageProperties,
};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A message the code under test published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target exchange.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Properties.
    pub properties: MessageProperties,
    /// Raw body.
    pub body: Vec<u8>,
}

impl PublishedMessage {
    /// Body parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Mock broker for testing.
///
/// Clones share state. Connections and channels from an earlier `connect()`
/// report closed once a newer connection exists.
#[derive(Debug, Default)]
pub struct MockBroker {
    inner: Arc<Mutex<MockBrokerInner>>,
}

#[derive(Debug, Default)]
struct MockBrokerInner {
    generation: u64,
    connection_open: bool,
    channel_open: bool,
    connects: usize,
    last_params: Option<BrokerParams>,
    prefetch: Option<u16>,
    queue: VecDeque<InboundFrame>,
    consumer: Option<(String, mpsc::UnboundedSender<InboundFrame>)>,
    next_delivery_tag: u64,
    next_consumer: u64,
    published: Vec<PublishedMessage>,
    tx_mode: bool,
    tx_pending: Vec<PublishedMessage>,
    commits: usize,
    rollbacks: usize,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
    teardown: Vec<&'static str>,
    fail_next_connect: Option<String>,
    fail_next_publish: Option<String>,
}

impl MockBroker {
    /// Create a new mock broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an inbound message. It goes to the active consumer if there is
    /// one, otherwise it waits for `get()` or the next consumer.
    pub fn deliver(&self, routing_key: &str, body: &[u8]) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_delivery_tag += 1;
        let frame = InboundFrame {
            routing_key: routing_key.to_string(),
            delivery_tag: inner.next_delivery_tag,
            body: body.to_vec(),
        };
        let tag = frame.delivery_tag;

        let undelivered = match inner.consumer.as_ref() {
            Some((_, tx)) => tx.send(frame).err().map(|returned| returned.0),
            None => Some(frame),
        };
        if let Some(frame) = undelivered {
            inner.queue.push_back(frame);
        }
        tag
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connection_open = false;
        inner.channel_open = false;
        inner.consumer = None;
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `publish()` to fail with the given error.
    pub fn fail_next_publish(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_publish = Some(error.to_string());
    }

    /// Messages that reached the exchange (committed, if in a transaction).
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Messages published inside the open transaction.
    pub fn uncommitted(&self) -> Vec<PublishedMessage> {
        self.inner.lock().unwrap().tx_pending.clone()
    }

    /// Number of commits and rollbacks.
    pub fn transaction_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.commits, inner.rollbacks)
    }

    /// Delivery tags acknowledged so far.
    pub fn acked(&self) -> Vec<u64> {
        self.inner.lock().unwrap().acked.clone()
    }

    /// Delivery tags rejected so far, with their requeue flag.
    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.inner.lock().unwrap().nacked.clone()
    }

    /// Messages still waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// True while a consumer is attached.
    pub fn has_consumer(&self) -> bool {
        self.inner.lock().unwrap().consumer.is_some()
    }

    /// Parameters of the last `connect()`.
    pub fn last_params(&self) -> Option<BrokerParams> {
        self.inner.lock().unwrap().last_params.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    /// Prefetch count set by the last `qos()`.
    pub fn prefetch(&self) -> Option<u16> {
        self.inner.lock().unwrap().prefetch
    }

    /// Order in which consumer, channel and connection were released.
    pub fn teardown_log(&self) -> Vec<&'static str> {
        self.inner.lock().unwrap().teardown.clone()
    }

    /// Clear all state and failure injection.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockBrokerInner::default();
    }
}

impl Clone for MockBroker {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.generation += 1;
        inner.connects += 1;
        inner.connection_open = true;
        inner.channel_open = false;
        inner.consumer = None;
        inner.tx_mode = false;
        inner.tx_pending.clear();
        inner.last_params = Some(params.clone());

        Ok(Box::new(MockConnection {
            inner: Arc::clone(&self.inner),
            generation: inner.generation,
        }))
    }
}

struct MockConnection {
    inner: Arc<Mutex<MockBrokerInner>>,
    generation: u64,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.inner.lock().unwrap().channel_open = true;
        Ok(Box::new(MockChannel {
            inner: Arc::clone(&self.inner),
            generation: self.generation,
        }))
    }

    fn is_open(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.generation == self.generation && inner.connection_open
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation == self.generation {
            inner.connection_open = false;
            inner.channel_open = false;
        }
        inner.teardown.push("connection");
        Ok(())
    }
}

struct MockChannel {
    inner: Arc<Mutex<MockBrokerInner>>,
    generation: u64,
}

impl MockChannel {
    fn open_inner(&self) -> Result<std::sync::MutexGuard<'_, MockBrokerInner>, TransportError> {
        let inner = self.inner.lock().unwrap();
        if inner.generation != self.generation || !inner.channel_open {
            return Err(TransportError::NotConnected);
        }
        Ok(inner)
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn qos(&self, prefetch_count: u16) -> Result<(), TransportError> {
        self.open_inner()?.prefetch = Some(prefetch_count);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.open_inner()?;

        if let Some(error) = inner.fail_next_publish.take() {
            return Err(TransportError::PublishFailed(error));
        }

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
        };
        if inner.tx_mode {
            inner.tx_pending.push(message);
        } else {
            inner.published.push(message);
        }
        Ok(())
    }

    async fn consume(
        &self,
        _queue: &str,
    ) -> Result<(String, mpsc::UnboundedReceiver<InboundFrame>), TransportError> {
        let mut inner = self.open_inner()?;
        let (tx, rx) = mpsc::unbounded_channel();

        // Anything already queued goes to the new consumer first
        while let Some(frame) = inner.queue.pop_front() {
            let _ = tx.send(frame);
        }

        inner.next_consumer += 1;
        let tag = format!("ctag-{}", inner.next_consumer);
        inner.consumer = Some((tag.clone(), tx));
        Ok((tag, rx))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .consumer
            .as_ref()
            .is_some_and(|(tag, _)| tag == consumer_tag)
        {
            inner.consumer = None;
        }
        inner.teardown.push("consumer");
        Ok(())
    }

    async fn get(&self, _queue: &str) -> Result<Option<InboundFrame>, TransportError> {
        Ok(self.open_inner()?.queue.pop_front())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.open_inner()?.acked.push(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.open_inner()?.nacked.push((delivery_tag, requeue));
        Ok(())
    }

    async fn tx_select(&self) -> Result<(), TransportError> {
        self.open_inner()?.tx_mode = true;
        Ok(())
    }

    async fn tx_commit(&self) -> Result<(), TransportError> {
        let mut inner = self.open_inner()?;
        let pending = std::mem::take(&mut inner.tx_pending);
        inner.published.extend(pending);
        inner.commits += 1;
        Ok(())
    }

    async fn tx_rollback(&self) -> Result<(), TransportError> {
        let mut inner = self.open_inner()?;
        inner.tx_pending.clear();
        inner.rollbacks += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.generation == self.generation && inner.channel_open
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation == self.generation {
            inner.channel_open = false;
            inner.consumer = None;
        }
        inner.teardown.push("channel");
        Ok(())
    }
}
