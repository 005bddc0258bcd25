//! Live session state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! broker session lifecycle. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! There is no reconnect timer: a lost connection lands in `Disconnected`
//! and stays there until the application asks to connect again. Every
//! connect attempt starts with a full teardown of whatever is left.

/// Session state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No usable connection.
    #[default]
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connection and channel open.
    Connected,
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller
    /// (fieldlink-client) is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            (_, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::TearDown, Action::Open])
            }

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![Action::EmitEvent(SessionEvent::Connected)],
            ),
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Disconnected,
                vec![
                    Action::TearDown,
                    Action::EmitEvent(SessionEvent::ConnectFailed { error }),
                ],
            ),

            // From Connected
            (Self::Connected, Event::ConnectionLost { reason }) => (
                Self::Disconnected,
                vec![Action::EmitEvent(SessionEvent::ConnectionLost { reason })],
            ),
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::TearDown,
                    Action::EmitEvent(SessionEvent::Disconnected),
                ],
            ),

            // Teardown is always safe, even with nothing open
            (_, Event::DisconnectRequested) => (Self::Disconnected, vec![Action::TearDown]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connect is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Application requested a connection.
    ConnectRequested,
    /// Descriptor fetched, connection and channel open.
    ConnectSucceeded,
    /// Any connect step failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An open connection or channel was found closed.
    ConnectionLost {
        /// What was observed.
        reason: String,
    },
    /// Application requested a disconnect.
    DisconnectRequested,
}

/// Actions to be executed by the client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Release consumer, channel, connection and parameters, in that order.
    TearDown,
    /// Fetch the descriptor and open connection and channel.
    Open,
    /// Report a lifecycle event.
    EmitEvent(SessionEvent),
}

/// Lifecycle events reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session is usable.
    Connected,
    /// Connect attempt failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Connection dropped underneath the session.
    ConnectionLost {
        /// What was observed.
        reason: String,
    },
    /// Session closed on request.
    Disconnected,
}
