//! Error types for fieldlink-client.

use crate::config::ConfigError;
use fieldlink_types::DataError;
use thiserror::Error;

/// Network-level failures talking to the control plane or the broker.
///
/// Recoverable: the caller retries later or buffers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Publish failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The control plane answered with a non-OK status.
    #[error("http status {status}: {reason}")]
    Http {
        /// Status code.
        status: u16,
        /// Reason phrase or body excerpt.
        reason: String,
    },

    /// The request could not be sent or its response not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The response body did not decode.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Durable buffer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record's data kind or payload cannot be handled.
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// A stored timestamp is outside the representable range.
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Settings cache errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No snapshot has been loaded yet.
    #[error("settings not initialized")]
    NotInitialized,

    /// The active snapshot has no value with this id.
    #[error("setting {0} not found")]
    NotFound(i32),

    /// Remote fetch failed and no durable copy exists.
    #[error("settings unavailable: {0}")]
    Unavailable(#[source] TransportError),

    /// The value does not parse as the requested type.
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// Durable copy could not be read or written.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Store-and-forward errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Buffer read or write failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Backlog is non-empty and the sink is unreachable.
    #[error("delivery target unreachable")]
    Unreachable,

    /// A drain stopped part way. Everything delivered before it is marked.
    #[error("delivery failed after {delivered} records: {source}")]
    Delivery {
        /// Records delivered and marked before the failure.
        delivered: usize,
        /// What failed.
        source: TransportError,
    },
}

/// Error raised by a command or pulse handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Live session errors.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The session has no open connection and channel.
    #[error("not connected")]
    NotConnected,

    /// Illegal configuration or call combination.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A handler failed; the frame was left unacknowledged.
    #[error("handler for subject {subject_id} failed: {source}")]
    Handler {
        /// Command or pulse id the handler was registered for.
        subject_id: i32,
        /// The handler's error.
        source: HandlerError,
    },

    /// The control plane returned an unusable descriptor.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for live session operations.
pub type LiveResult<T> = std::result::Result<T, LiveError>;
