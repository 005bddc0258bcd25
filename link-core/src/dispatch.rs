//! Inbound frame classification.
//!
//! Decides what an inbound frame is before any handler is consulted. The
//! caller still has to look up a handler for the subject and reject the frame
//! when none is registered.

use crate::routing::{MessageClass, RoutingKey};
use fieldlink_types::{Command, Pulse};
use std::fmt;

/// What to do with an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// A command for this device, to be handed to the handler for `command.id`.
    Command(Command),
    /// A pulse for this device, to be handed to the handler for `pulse.pulse_id`.
    Pulse(Pulse),
    /// Negatively acknowledge without requeueing.
    Reject(RejectReason),
}

/// Why a frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Routing key has no identity or class segment.
    UnparsableAddress(String),
    /// Frame is addressed to another identity.
    ForeignIdentity(String),
    /// Frame has no body.
    EmptyBody,
    /// Class is unknown or never dispatched to handlers.
    UnroutableClass(MessageClass),
    /// Body does not decode as the class's message.
    MalformedBody(String),
    /// Nothing is registered for the subject.
    NoHandler(i32),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnparsableAddress(key) => write!(f, "unparsable routing key '{key}'"),
            Self::ForeignIdentity(mid) => write!(f, "addressed to foreign identity '{mid}'"),
            Self::EmptyBody => f.write_str("empty body"),
            Self::UnroutableClass(class) => write!(f, "unroutable message class '{class}'"),
            Self::MalformedBody(reason) => write!(f, "malformed body: {reason}"),
            Self::NoHandler(id) => write!(f, "no handler registered for subject {id}"),
        }
    }
}

/// Classify an inbound frame for the session identified by `own_mid`.
pub fn classify(own_mid: &str, routing_key: &str, body: &[u8]) -> Route {
    let Some(key) = RoutingKey::parse(routing_key) else {
        return Route::Reject(RejectReason::UnparsableAddress(routing_key.to_string()));
    };
    if key.mid != own_mid {
        return Route::Reject(RejectReason::ForeignIdentity(key.mid));
    }
    if body.is_empty() {
        return Route::Reject(RejectReason::EmptyBody);
    }

    match key.class {
        MessageClass::Command => match serde_json::from_slice::<Command>(body) {
            Ok(command) => Route::Command(command),
            Err(e) => Route::Reject(RejectReason::MalformedBody(e.to_string())),
        },
        MessageClass::Pulse => match serde_json::from_slice::<Pulse>(body) {
            Ok(pulse) => Route::Pulse(pulse),
            Err(e) => Route::Reject(RejectReason::MalformedBody(e.to_string())),
        },
        other => Route::Reject(RejectReason::UnroutableClass(other)),
    }
}
