//! AMQP 0-9-1 broker backend on `lapin`.

use super::{
    Broker, BrokerChannel, BrokerConnection, BrokerParams, InboundFrame, MessageProperties,
};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::uri::{AMQPScheme, AMQPUri};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;

const CLOSE_REPLY_CODE: u16 = 200;
const CLOSE_REPLY_TEXT: &str = "Goodbye";

/// Broker backed by a real AMQP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

fn uri(params: &BrokerParams) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.scheme = if params.use_tls {
        AMQPScheme::AMQPS
    } else {
        AMQPScheme::AMQP
    };
    uri.authority.host = params.host.clone();
    uri.authority.port = params.port;
    uri.authority.userinfo.username = params.username.clone();
    uri.authority.userinfo.password = params.password.clone();
    uri.query.heartbeat = Some(params.heartbeat.as_secs());
    uri.query.connection_timeout = Some(params.timeout.as_millis() as u64);
    uri
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        if params.accept_invalid_certs {
            tracing::warn!("Broker TLS certificate errors are not ignored by the AMQP backend");
        }

        let connection = Connection::connect_uri(uri(params), ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("AMQP connection open to {}:{}", params.host, params.port);
        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        self.connection
            .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

fn channel_error(e: lapin::Error) -> TransportError {
    match e {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            TransportError::ConnectionClosed
        }
        other => TransportError::ReceiveFailed(other.to_string()),
    }
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(properties.content_type.clone()))
        .with_delivery_mode(properties.delivery_mode as u8);
    if let Some(expiration) = properties.expiration {
        props = props.with_expiration(ShortString::from(expiration.as_millis().to_string()));
    }
    props
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn qos(&self, prefetch_count: u16) -> Result<(), TransportError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(channel_error)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                basic_properties(properties),
            )
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
    ) -> Result<(String, mpsc::UnboundedReceiver<InboundFrame>), TransportError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;
        let tag = consumer.tag().to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::warn!("Consumer stream failed: {}", e);
                        break;
                    }
                };
                let frame = InboundFrame {
                    routing_key: delivery.routing_key.to_string(),
                    delivery_tag: delivery.delivery_tag,
                    body: delivery.data,
                };
                if tx.send(frame).is_err() {
                    break;
                }
            }
        });

        Ok((tag, rx))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(channel_error)
    }

    async fn get(&self, queue: &str) -> Result<Option<InboundFrame>, TransportError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(channel_error)?;

        Ok(message.map(|message| InboundFrame {
            routing_key: message.delivery.routing_key.to_string(),
            delivery_tag: message.delivery.delivery_tag,
            body: message.delivery.data,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(channel_error)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(channel_error)
    }

    async fn tx_select(&self) -> Result<(), TransportError> {
        self.channel.tx_select().await.map_err(channel_error)
    }

    async fn tx_commit(&self) -> Result<(), TransportError> {
        self.channel
            .tx_commit()
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn tx_rollback(&self) -> Result<(), TransportError> {
        self.channel.tx_rollback().await.map_err(channel_error)
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        self.channel
            .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
            .await
            .map_err(channel_error)
    }
}
