//! # fieldlink-client
//!
//! Device-side communication layer for intermittently connected telemetry
//! devices.
//!
//! ## Features
//!
//! - **Store-and-forward**: observations are delivered directly while the
//!   network is healthy and buffered in SQLite when it is not
//! - **Ordered drain**: the backlog is delivered in insertion order, slice by
//!   slice, with nothing lost on partial failure
//! - **Settings cache**: last-known-good settings survive offline restarts
//! - **Live session**: one broker connection with handler dispatch, flow
//!   control and transactional publishing
//! - **Pure State Machine**: the session lifecycle comes from fieldlink-core
//!
//! ## Example
//!
//! ```ignore
//! use fieldlink_client::{BufferStore, ClientConfig, Forwarder, HttpControlPlane};
//!
//! let config = ClientConfig::from_file(Path::new("fieldlink.toml"))?;
//! let control = HttpControlPlane::new(
//!     &config.device.endpoint(),
//!     config.device.credentials(),
//!     config.timeout(),
//!     config.network.ignore_ssl_certificate_errors,
//! )?;
//! let store = BufferStore::open(&config.buffer.path).await?;
//! let forwarder = Forwarder::new(control, store).with_upload_limit(config.upload_limit());
//!
//! forwarder.log_observation(42, &Observation::now(ObservationValue::Double(21.5)), true).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod control;
pub mod error;
pub mod forward;
pub mod live;
pub mod settings;
pub mod sink;
pub mod store;

#[cfg(feature = "amqp")]
pub use broker::AmqpBroker;
pub use broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerParams, DeliveryMode, InboundFrame,
    MessageProperties, MockBroker, PublishedMessage,
};
pub use config::{ClientConfig, ConfigError};
pub use control::{ControlEndpoint, ControlPlane, HttpControlPlane, MockControlPlane};
pub use error::{
    ForwardError, HandlerError, LiveError, LiveResult, SettingsError, StoreError, StoreResult,
    TransportError,
};
pub use forward::{DrainOutcome, Forwarder, LogOutcome};
pub use live::{
    CommandHandler, Disposition, LiveConfig, LiveSession, PulseHandler, DEFAULT_BACKOFF,
    DEFAULT_PULSE_EXPIRY,
};
pub use settings::{SettingsCache, SettingsOrigin};
pub use sink::ObservationSink;
pub use store::{BufferStore, BufferedRecord, NewRecord, UploadLimit};
