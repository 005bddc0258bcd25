//! Messages exchanged with the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pulse id used by devices for their own liveness pulses.
pub const DEVICE_PULSE_ID: i32 = 0;

/// A command addressed to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    /// Command id (the subject handlers are registered for).
    pub id: i32,
    /// When the command was issued.
    pub timestamp: DateTime<Utc>,
    /// When the command stops being valid.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Arguments, possibly empty.
    #[serde(default)]
    pub arguments: Vec<CommandArgument>,
}

impl Command {
    /// Look up an argument value by argument id.
    pub fn argument(&self, id: i32) -> Option<&str> {
        self.arguments
            .iter()
            .find(|arg| arg.id == id)
            .map(|arg| arg.value.as_str())
    }
}

/// One command argument, value encoded as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandArgument {
    /// Argument id.
    pub id: i32,
    /// Argument value.
    pub value: String,
}

/// The device's answer to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandResponse {
    /// Id of the command being answered.
    pub id: i32,
    /// Timestamp of the command being answered.
    pub timestamp: DateTime<Utc>,
    /// When the device received the command.
    pub delivered_at: DateTime<Utc>,
    /// Whether the device accepted the command.
    pub was_accepted: bool,
    /// Application-specific result code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CommandResponse {
    /// Accept `command`, delivered now.
    pub fn accepted(command: &Command) -> Self {
        Self::for_command(command, true)
    }

    /// Reject `command`, delivered now.
    pub fn rejected(command: &Command) -> Self {
        Self::for_command(command, false)
    }

    fn for_command(command: &Command, was_accepted: bool) -> Self {
        Self {
            id: command.id,
            timestamp: command.timestamp,
            delivered_at: Utc::now(),
            was_accepted,
            result_code: None,
            comment: None,
        }
    }

    /// Attach a result code.
    pub fn with_result_code(mut self, code: i32) -> Self {
        self.result_code = Some(code);
        self
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A liveness pulse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pulse {
    /// When the pulse was emitted.
    pub timestamp: DateTime<Utc>,
    /// Emitting or addressed device.
    #[serde(rename = "MID")]
    pub mid: String,
    /// Pulse id, [`DEVICE_PULSE_ID`] for device pulses.
    pub pulse_id: i32,
}

/// Broker node the device should connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerNode {
    /// Broker host name.
    #[serde(rename = "MQHost")]
    pub host: String,
    /// Port for TLS connections.
    #[serde(rename = "MQPortEnc")]
    pub encrypted_port: u16,
    /// Port for plain connections.
    #[serde(rename = "MQPortUEnc")]
    pub unencrypted_port: u16,
}

/// Connection descriptor returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceConnection {
    /// Broker node, absent when the service has none assigned.
    #[serde(default)]
    pub node: Option<BrokerNode>,
    /// Back-off interval the device should honor between retries.
    #[serde(default)]
    pub backoff_seconds: Option<u32>,
}

/// Severity of a device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EventCategory {
    /// Not categorized.
    Undefined,
    /// Informational.
    Information,
    /// Warning.
    Warning,
    /// Recoverable error.
    Error,
    /// Unrecoverable failure.
    Failure,
}

impl TryFrom<u8> for EventCategory {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match code {
            0 => Ok(Self::Undefined),
            1 => Ok(Self::Information),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Error),
            4 => Ok(Self::Failure),
            other => Err(format!("unknown event category: {other}")),
        }
    }
}

impl From<EventCategory> for u8 {
    fn from(category: EventCategory) -> Self {
        match category {
            EventCategory::Undefined => 0,
            EventCategory::Information => 1,
            EventCategory::Warning => 2,
            EventCategory::Error => 3,
            EventCategory::Failure => 4,
        }
    }
}

/// An event reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceEvent {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub category: EventCategory,
    /// Short title.
    pub title: String,
    /// Details.
    pub body: String,
}
