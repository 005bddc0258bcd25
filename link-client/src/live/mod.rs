//! Live broker session.
//!
//! [`LiveSession`] keeps one long-lived broker connection for a device. It
//! covers the session lifecycle, inbound dispatch and outbound publishing.
//!
//! # Architecture
//!
//! The lifecycle runs through the pure state machine in `fieldlink-core`.
//! The session interprets its actions against the [`Broker`] traits:
//!
//! ```text
//! Application → LiveSession ─► Broker → Connection → Channel
//!                   │                                   │
//!                   └── Dispatcher ◄── consumer task ◄──┘
//! ```
//!
//! Everything that touches the channel (publish, ack/nack, transactions,
//! pause/resume, teardown) locks the same `SessionCore`. Handlers run with the
//! lock released. They are synchronous, so a reply is published from a task
//! the handler spawns.
//!
//! # Example
//!
//! ```ignore
//! let session = LiveSession::new(credentials, LiveConfig::default(), control, AmqpBroker::new());
//! session.register_command_handler(7, |mid, command| {
//!     println!("{mid} received command {}", command.id);
//!     Ok(())
//! });
//! session.connect().await?;
//! session.publish_observation(3, &Observation::now(ObservationValue::Double(21.5))).await?;
//! ```

mod dispatch;
mod handlers;
mod publish;

pub use dispatch::Disposition;
pub use handlers::{CommandHandler, PulseHandler};

use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerParams};
use crate::config::ConfigError;
use crate::control::ControlPlane;
use crate::error::{HandlerError, LiveError, LiveResult, TransportError};
use dispatch::Dispatcher;
use fieldlink_core::{
    exchange_name, queue_name, Action, ConnectionState, Event, HeartbeatInterval, SessionEvent,
};
use fieldlink_types::{Command, DeviceCredentials, Pulse};
use handlers::HandlerTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Pulse expiry used when none is given.
pub const DEFAULT_PULSE_EXPIRY: Duration = Duration::from_millis(300_000);

/// Back-off interval until the service sets one.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Live session options.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    heartbeat: HeartbeatInterval,
    prefetch_count: u16,
    automatic_callbacks: bool,
    atomic_transactions: bool,
    use_tls: bool,
    ignore_ssl_certificate_errors: bool,
    timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatInterval::default(),
            prefetch_count: 20,
            automatic_callbacks: true,
            atomic_transactions: true,
            use_tls: true,
            ignore_ssl_certificate_errors: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl LiveConfig {
    /// Set the heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatInterval) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the heartbeat from seconds, validating the range.
    pub fn with_heartbeat_secs(self, secs: u32) -> Result<Self, ConfigError> {
        Ok(self.with_heartbeat(HeartbeatInterval::new(secs)?))
    }

    /// Set the maximum number of unacknowledged deliveries.
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Dispatch inbound frames automatically (true) or only on `fetch()` (false).
    pub fn with_automatic_callbacks(mut self, enabled: bool) -> Self {
        self.automatic_callbacks = enabled;
        self
    }

    /// Refuse single publishes while a transaction is open.
    pub fn with_atomic_transactions(mut self, enabled: bool) -> Self {
        self.atomic_transactions = enabled;
        self
    }

    /// Use the broker's TLS port.
    pub fn with_use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Accept invalid broker certificates.
    pub fn with_ignore_ssl_certificate_errors(mut self, enabled: bool) -> Self {
        self.ignore_ssl_certificate_errors = enabled;
        self
    }

    /// Bound for descriptor fetch and connection setup.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Heartbeat interval.
    pub fn heartbeat(&self) -> HeartbeatInterval {
        self.heartbeat
    }

    /// Prefetch count.
    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    /// Whether frames are dispatched automatically.
    pub fn automatic_callbacks(&self) -> bool {
        self.automatic_callbacks
    }

    /// Whether single publishes are refused inside a transaction.
    pub fn atomic_transactions(&self) -> bool {
        self.atomic_transactions
    }

    /// Whether TLS is used.
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Whether invalid certificates are accepted.
    pub fn ignore_ssl_certificate_errors(&self) -> bool {
        self.ignore_ssl_certificate_errors
    }

    /// Connection setup timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

struct Consumer {
    tag: String,
    task: JoinHandle<()>,
}

/// Resources owned by a connected session, released top-down.
struct SessionResources {
    params: BrokerParams,
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
    consumer: Option<Consumer>,
}

impl SessionResources {
    /// Release consumer, channel and connection, in that order.
    async fn release(self) {
        if let Some(consumer) = self.consumer {
            if let Err(e) = self.channel.cancel(&consumer.tag).await {
                tracing::debug!("Consumer cancel failed: {}", e);
            }
            consumer.task.abort();
        }
        if let Err(e) = self.channel.close().await {
            tracing::debug!("Channel close failed: {}", e);
        }
        if let Err(e) = self.connection.close().await {
            tracing::debug!("Connection close failed: {}", e);
        }
        tracing::debug!("Released broker resources for {}", self.params.host);
    }

    fn is_open(&self) -> bool {
        self.connection.is_open() && self.channel.is_open()
    }
}

/// Session state shared by the lifecycle, the dispatcher and the publisher.
pub(crate) struct SessionCore {
    state: ConnectionState,
    resources: Option<SessionResources>,
    transaction_open: bool,
    backoff: Duration,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: ConnectionState::new(),
            resources: None,
            transaction_open: false,
            backoff: DEFAULT_BACKOFF,
        }
    }

    fn apply(&mut self, event: Event) -> Vec<Action> {
        let (next, actions) = self.state.on_event(event);
        self.state = next;
        actions
    }

    /// Run teardown and emit actions. `Open` is performed by `connect()`.
    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::TearDown => self.tear_down().await,
                Action::Open => {}
                Action::EmitEvent(event) => log_event(&event),
            }
        }
    }

    async fn tear_down(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.release().await;
        }
        self.transaction_open = false;
    }

    /// The channel, if connection and channel are both open.
    pub(crate) fn open_channel(&self) -> Option<&dyn BrokerChannel> {
        self.resources
            .as_ref()
            .filter(|resources| resources.is_open())
            .map(|resources| resources.channel.as_ref())
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected => tracing::info!("Live session connected"),
        SessionEvent::ConnectFailed { error } => {
            tracing::warn!("Live session connect failed: {}", error)
        }
        SessionEvent::ConnectionLost { reason } => {
            tracing::warn!("Live session lost: {}", reason)
        }
        SessionEvent::Disconnected => tracing::info!("Live session disconnected"),
    }
}

/// A device's live broker session.
///
/// Reconnection is never automatic: a dropped connection shows up as
/// `is_connected() == false` and the application calls `connect()` again.
pub struct LiveSession<C: ControlPlane, B: Broker> {
    credentials: DeviceCredentials,
    config: LiveConfig,
    control: C,
    broker: B,
    exchange: String,
    queue: String,
    handlers: Arc<HandlerTable>,
    core: Arc<Mutex<SessionCore>>,
}

impl<C: ControlPlane, B: Broker> LiveSession<C, B> {
    /// Create a disconnected session.
    pub fn new(credentials: DeviceCredentials, config: LiveConfig, control: C, broker: B) -> Self {
        let exchange = exchange_name(credentials.mid());
        let queue = queue_name(credentials.mid());
        Self {
            credentials,
            config,
            control,
            broker,
            exchange,
            queue,
            handlers: Arc::new(HandlerTable::new()),
            core: Arc::new(Mutex::new(SessionCore::new())),
        }
    }

    /// Session options.
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Device identifier.
    pub fn mid(&self) -> &str {
        self.credentials.mid()
    }

    /// Connect, replacing any existing connection.
    ///
    /// Fetches the broker descriptor from the control plane, opens connection
    /// and channel, sets the prefetch count and, with automatic callbacks,
    /// starts consuming.
    pub async fn connect(&self) -> LiveResult<()> {
        let mut core = self.core.lock().await;
        let actions = core.apply(Event::ConnectRequested);
        core.execute(actions).await;

        match self.open(&mut core).await {
            Ok(resources) => {
                tracing::info!(
                    "Connected to broker {}:{} as {}",
                    resources.params.host,
                    resources.params.port,
                    self.mid()
                );
                core.resources = Some(resources);
                let actions = core.apply(Event::ConnectSucceeded);
                core.execute(actions).await;
                Ok(())
            }
            Err(e) => {
                let actions = core.apply(Event::ConnectFailed {
                    error: e.to_string(),
                });
                core.execute(actions).await;
                Err(e)
            }
        }
    }

    async fn open(&self, core: &mut SessionCore) -> LiveResult<SessionResources> {
        let descriptor = tokio::time::timeout(
            self.config.timeout,
            self.control.connection_descriptor(),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let node = descriptor
            .node
            .ok_or_else(|| LiveError::Protocol("descriptor has no broker node".into()))?;
        if let Some(secs) = descriptor.backoff_seconds.filter(|secs| *secs > 0) {
            core.backoff = Duration::from_secs(u64::from(secs));
        }

        let params = BrokerParams {
            port: if self.config.use_tls {
                node.encrypted_port
            } else {
                node.unencrypted_port
            },
            host: node.host,
            username: self.credentials.mid().to_string(),
            password: self.credentials.pre_shared_key().to_string(),
            heartbeat: self.config.heartbeat,
            use_tls: self.config.use_tls,
            accept_invalid_certs: self.config.ignore_ssl_certificate_errors,
            timeout: self.config.timeout,
        };

        let connection = tokio::time::timeout(self.config.timeout, self.broker.connect(&params))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e.into());
            }
        };

        let mut resources = SessionResources {
            params,
            connection,
            channel,
            consumer: None,
        };

        if let Err(e) = resources.channel.qos(self.config.prefetch_count).await {
            resources.release().await;
            return Err(e.into());
        }

        if self.config.automatic_callbacks {
            match self.start_consumer(resources.channel.as_ref()).await {
                Ok(consumer) => resources.consumer = Some(consumer),
                Err(e) => {
                    resources.release().await;
                    return Err(e);
                }
            }
        }

        Ok(resources)
    }

    async fn start_consumer(&self, channel: &dyn BrokerChannel) -> LiveResult<Consumer> {
        let (tag, rx) = channel.consume(&self.queue).await?;
        let task = tokio::spawn(self.dispatcher().run(rx));
        tracing::debug!("Consuming {} as {}", self.queue, tag);
        Ok(Consumer { tag, task })
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.credentials.mid(),
            Arc::clone(&self.handlers),
            Arc::clone(&self.core),
        )
    }

    /// Release consumer, channel and connection. Safe to call when already
    /// disconnected.
    pub async fn disconnect(&self) {
        let mut core = self.core.lock().await;
        let actions = core.apply(Event::DisconnectRequested);
        core.execute(actions).await;
    }

    /// True when connection and channel are both present and open.
    ///
    /// Notices a connection the broker dropped and records it as lost.
    pub async fn is_connected(&self) -> bool {
        let mut core = self.core.lock().await;
        let open = core.resources.as_ref().is_some_and(|r| r.is_open());
        if !open && core.state.is_connected() {
            let actions = core.apply(Event::ConnectionLost {
                reason: "connection or channel closed".into(),
            });
            core.execute(actions).await;
        }
        open && core.state.is_connected()
    }

    /// Lifecycle state as last recorded.
    pub async fn state(&self) -> ConnectionState {
        self.core.lock().await.state
    }

    /// Back-off interval the service asked for (default one minute).
    pub async fn backoff_interval(&self) -> Duration {
        self.core.lock().await.backoff
    }

    /// Stop automatic dispatch without closing the connection.
    ///
    /// # Errors
    ///
    /// `ConfigError::AutomaticDispatchDisabled` when automatic callbacks are
    /// off, `LiveError::NotConnected` without an open channel.
    pub async fn pause_incoming(&self) -> LiveResult<()> {
        self.ensure_automatic_dispatch()?;
        let mut core = self.core.lock().await;
        if core.open_channel().is_none() {
            return Err(LiveError::NotConnected);
        }
        let Some(resources) = core.resources.as_mut() else {
            return Err(LiveError::NotConnected);
        };

        // The dispatcher drains what it already received, then exits
        if let Some(consumer) = resources.consumer.take() {
            resources.channel.cancel(&consumer.tag).await?;
            tracing::debug!("Paused consumer {}", consumer.tag);
        }
        Ok(())
    }

    /// True while a dispatcher is consuming deliveries.
    ///
    /// Turns false after `pause_incoming()`, on disconnect, and when a handler
    /// error stops automatic dispatch.
    pub async fn dispatching(&self) -> bool {
        let core = self.core.lock().await;
        core.resources
            .as_ref()
            .and_then(|resources| resources.consumer.as_ref())
            .is_some_and(|consumer| !consumer.task.is_finished())
    }

    /// Restart automatic dispatch after `pause_incoming()`, or after a handler
    /// error stopped the dispatcher.
    pub async fn resume_incoming(&self) -> LiveResult<()> {
        self.ensure_automatic_dispatch()?;
        let mut core = self.core.lock().await;
        if core.open_channel().is_none() {
            return Err(LiveError::NotConnected);
        }
        let Some(resources) = core.resources.as_mut() else {
            return Err(LiveError::NotConnected);
        };

        // A stopped dispatcher still holds its broker registration
        if resources
            .consumer
            .as_ref()
            .is_some_and(|consumer| consumer.task.is_finished())
        {
            if let Some(stopped) = resources.consumer.take() {
                if let Err(e) = resources.channel.cancel(&stopped.tag).await {
                    tracing::debug!("Cancel of stopped consumer {} failed: {}", stopped.tag, e);
                }
                tracing::info!("Restarting dispatch after consumer {} stopped", stopped.tag);
            }
        }

        if resources.consumer.is_none() {
            let consumer = self.start_consumer(resources.channel.as_ref()).await?;
            resources.consumer = Some(consumer);
        }
        Ok(())
    }

    fn ensure_automatic_dispatch(&self) -> LiveResult<()> {
        if self.config.automatic_callbacks {
            Ok(())
        } else {
            Err(ConfigError::AutomaticDispatchDisabled.into())
        }
    }

    /// Pull and dispatch every frame currently queued, then return.
    ///
    /// Returns the number of frames taken from the queue, rejected ones
    /// included.
    ///
    /// # Errors
    ///
    /// A handler error stops the loop and is returned as
    /// [`LiveError::Handler`]; that frame stays unacknowledged.
    pub async fn fetch(&self) -> LiveResult<usize> {
        let dispatcher = self.dispatcher();
        let mut taken = 0;
        loop {
            let frame = {
                let core = self.core.lock().await;
                let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
                let frame = channel.get(&self.queue).await?;
                frame
            };
            let Some(frame) = frame else {
                break;
            };
            taken += 1;
            dispatcher.dispatch(&frame).await?;
        }
        Ok(taken)
    }

    /// Register a handler for `command_id`. Earlier registrations take
    /// precedence.
    pub fn register_command_handler<F>(&self, command_id: i32, handler: F)
    where
        F: Fn(&str, &Command) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.commands.register(command_id, Arc::new(handler));
    }

    /// Remove every handler for `command_id`. Returns how many were removed.
    pub fn unregister_command_handler(&self, command_id: i32) -> usize {
        self.handlers.commands.unregister(command_id)
    }

    /// Register a handler for `pulse_id`. Earlier registrations take
    /// precedence.
    pub fn register_pulse_handler<F>(&self, pulse_id: i32, handler: F)
    where
        F: Fn(&str, &Pulse) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.pulses.register(pulse_id, Arc::new(handler));
    }

    /// Remove every handler for `pulse_id`. Returns how many were removed.
    pub fn unregister_pulse_handler(&self, pulse_id: i32) -> usize {
        self.handlers.pulses.unregister(pulse_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::control::MockControlPlane;
    use fieldlink_types::{BrokerNode, DeviceConnection};

    pub(crate) type TestSession = LiveSession<MockControlPlane, MockBroker>;

    pub(crate) fn session(config: LiveConfig) -> (TestSession, MockControlPlane, MockBroker) {
        let control = MockControlPlane::new();
        let broker = MockBroker::new();
        let session = LiveSession::new(
            DeviceCredentials::new("DEV001", "secret"),
            config,
            control.clone(),
            broker.clone(),
        );
        (session, control, broker)
    }

    pub(crate) fn manual() -> LiveConfig {
        LiveConfig::default().with_automatic_callbacks(false)
    }

    // ===========================================
    // Configuration
    // ===========================================

    #[test]
    fn config_defaults() {
        let config = LiveConfig::default();
        assert_eq!(config.heartbeat().as_secs(), 60);
        assert_eq!(config.prefetch_count(), 20);
        assert!(config.automatic_callbacks());
        assert!(config.atomic_transactions());
        assert!(config.use_tls());
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn heartbeat_range_is_enforced() {
        assert!(matches!(
            LiveConfig::default().with_heartbeat_secs(45),
            Err(ConfigError::Heartbeat(_))
        ));
        assert!(matches!(
            LiveConfig::default().with_heartbeat_secs(3601),
            Err(ConfigError::Heartbeat(_))
        ));
        let disabled = LiveConfig::default().with_heartbeat_secs(0).unwrap();
        assert!(disabled.heartbeat().is_disabled());
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    #[tokio::test]
    async fn connect_opens_and_negotiates() {
        let (session, control, broker) = session(LiveConfig::default().with_prefetch_count(5));
        control.set_descriptor(DeviceConnection {
            node: Some(BrokerNode {
                host: "mq.example.net".into(),
                encrypted_port: 5671,
                unencrypted_port: 5672,
            }),
            backoff_seconds: Some(90),
        });

        session.connect().await.unwrap();

        assert!(session.is_connected().await);
        assert_eq!(session.state().await, ConnectionState::Connected);
        assert_eq!(session.backoff_interval().await, Duration::from_secs(90));
        assert_eq!(broker.prefetch(), Some(5));
        assert!(broker.has_consumer());

        let params = broker.last_params().unwrap();
        assert_eq!(params.host, "mq.example.net");
        assert_eq!(params.port, 5671);
        assert_eq!(params.username, "DEV001");
        assert_eq!(params.heartbeat.as_secs(), 60);
    }

    #[tokio::test]
    async fn plain_transport_uses_unencrypted_port() {
        let (session, _control, broker) = session(LiveConfig::default().with_use_tls(false));
        session.connect().await.unwrap();
        assert_eq!(broker.last_params().unwrap().port, 5672);
    }

    #[tokio::test]
    async fn manual_mode_does_not_consume() {
        let (session, _control, broker) = session(manual());
        session.connect().await.unwrap();
        assert!(!broker.has_consumer());
    }

    #[tokio::test]
    async fn descriptor_failure_leaves_disconnected() {
        let (session, control, broker) = session(LiveConfig::default());
        control.fail_next_descriptor("service down");

        let result = session.connect().await;

        assert!(matches!(result, Err(LiveError::Transport(_))));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(!session.is_connected().await);
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn descriptor_without_node_is_protocol_error() {
        let (session, control, _broker) = session(LiveConfig::default());
        control.set_descriptor(DeviceConnection::default());

        assert!(matches!(
            session.connect().await,
            Err(LiveError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn broker_refusal_leaves_disconnected() {
        let (session, _control, broker) = session(LiveConfig::default());
        broker.fail_next_connect("access refused");

        assert!(matches!(
            session.connect().await,
            Err(LiveError::Transport(TransportError::ConnectionFailed(_)))
        ));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_releases_in_order_and_is_idempotent() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.connect().await.unwrap();

        session.disconnect().await;
        session.disconnect().await;

        assert!(!session.is_connected().await);
        assert_eq!(
            broker.teardown_log(),
            vec!["consumer", "channel", "connection"]
        );
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_safe() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.disconnect().await;
        assert!(broker.teardown_log().is_empty());
    }

    #[tokio::test]
    async fn reconnect_tears_down_first() {
        let (session, _control, broker) = session(manual());
        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(broker.connect_count(), 2);
        assert_eq!(broker.teardown_log(), vec!["channel", "connection"]);
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn dropped_connection_is_noticed() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.connect().await.unwrap();

        broker.drop_connection();

        assert!(!session.is_connected().await);
        assert_eq!(session.state().await, ConnectionState::Disconnected);

        // No background reconnect; an explicit connect recovers
        session.connect().await.unwrap();
        assert!(session.is_connected().await);
    }

    // ===========================================
    // Pause and resume
    // ===========================================

    #[tokio::test]
    async fn pause_and_resume_toggle_consumer() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.connect().await.unwrap();

        session.pause_incoming().await.unwrap();
        assert!(!broker.has_consumer());
        assert!(session.is_connected().await);

        session.resume_incoming().await.unwrap();
        assert!(broker.has_consumer());
    }

    #[tokio::test]
    async fn pause_requires_automatic_dispatch() {
        let (session, _control, _broker) = session(manual());
        session.connect().await.unwrap();

        assert!(matches!(
            session.pause_incoming().await,
            Err(LiveError::Config(ConfigError::AutomaticDispatchDisabled))
        ));
        assert!(matches!(
            session.resume_incoming().await,
            Err(LiveError::Config(ConfigError::AutomaticDispatchDisabled))
        ));
    }

    #[tokio::test]
    async fn pause_while_disconnected_fails() {
        let (session, _control, _broker) = session(LiveConfig::default());
        assert!(matches!(
            session.pause_incoming().await,
            Err(LiveError::NotConnected)
        ));
    }
}
