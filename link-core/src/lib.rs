//! # fieldlink-core
//!
//! Pure logic for fieldlink (no I/O, instant tests).
//!
//! This crate implements the state machine and the encoding rules used by the
//! device client without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`codec`] turns typed values into the text stored in the buffer and back
//! - [`heartbeat`] validates broker heartbeat intervals
//! - [`routing`] builds and parses broker addresses
//! - [`dispatch`] classifies inbound frames before any handler runs
//! - [`state`] drives the live session lifecycle
//!
//! The actual I/O (broker, HTTP, SQLite) is performed by `fieldlink-client`,
//! which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod dispatch;
pub mod heartbeat;
pub mod routing;
pub mod state;

pub use dispatch::{classify, RejectReason, Route};
pub use heartbeat::{HeartbeatError, HeartbeatInterval};
pub use routing::{exchange_name, queue_name, MessageClass, RoutingKey};
pub use state::{Action, ConnectionState, Event, SessionEvent};
