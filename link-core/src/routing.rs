//! Broker addresses.
//!
//! Every device owns one exchange (`{mid}.X`) it publishes to and one queue
//! (`{mid}.Q`) it consumes from. Routing keys are dot-separated:
//! `{mid}.{class}.{subject}` where class is `O` (observation), `C` (command),
//! `CR` (command response) or `P` (pulse).

use std::fmt;

/// Exchange the device publishes to.
pub fn exchange_name(mid: &str) -> String {
    format!("{mid}.X")
}

/// Queue the device consumes from.
pub fn queue_name(mid: &str) -> String {
    format!("{mid}.Q")
}

/// Message class encoded in a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// `O`
    Observation,
    /// `C`
    Command,
    /// `CR`
    CommandResponse,
    /// `P`
    Pulse,
    /// Any other token.
    Unknown(String),
}

impl MessageClass {
    fn token(&self) -> &str {
        match self {
            Self::Observation => "O",
            Self::Command => "C",
            Self::CommandResponse => "CR",
            Self::Pulse => "P",
            Self::Unknown(token) => token,
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            "O" => Self::Observation,
            "C" => Self::Command,
            "CR" => Self::CommandResponse,
            "P" => Self::Pulse,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    /// Device identity the key is addressed to or from.
    pub mid: String,
    /// Message class.
    pub class: MessageClass,
    /// Subject id, when the key carries a numeric one.
    pub subject_id: Option<i32>,
}

impl RoutingKey {
    /// Key for an observation published by `mid`.
    pub fn observation(mid: &str, observation_id: i32) -> Self {
        Self::new(mid, MessageClass::Observation, observation_id)
    }

    /// Key for a command addressed to `mid`.
    pub fn command(mid: &str, command_id: i32) -> Self {
        Self::new(mid, MessageClass::Command, command_id)
    }

    /// Key for a command response published by `mid`.
    pub fn command_response(mid: &str, command_id: i32) -> Self {
        Self::new(mid, MessageClass::CommandResponse, command_id)
    }

    /// Key for a pulse.
    pub fn pulse(mid: &str, pulse_id: i32) -> Self {
        Self::new(mid, MessageClass::Pulse, pulse_id)
    }

    fn new(mid: &str, class: MessageClass, subject_id: i32) -> Self {
        Self {
            mid: mid.to_string(),
            class,
            subject_id: Some(subject_id),
        }
    }

    /// Parse `mid.class[.subject[...]]`.
    ///
    /// Returns `None` when the identity or class segment is missing. Segments
    /// after the subject are ignored.
    pub fn parse(key: &str) -> Option<Self> {
        let mut segments = key.split('.');
        let mid = segments.next().filter(|s| !s.is_empty())?;
        let class = segments.next().filter(|s| !s.is_empty())?;
        let subject_id = segments.next().and_then(|s| s.parse().ok());

        Some(Self {
            mid: mid.to_string(),
            class: MessageClass::from_token(class),
            subject_id,
        })
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.mid, self.class)?;
        if let Some(id) = self.subject_id {
            write!(f, ".{id}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_addresses() {
        assert_eq!(exchange_name("DEV001"), "DEV001.X");
        assert_eq!(queue_name("DEV001"), "DEV001.Q");
    }

    #[test]
    fn formats_each_class() {
        assert_eq!(RoutingKey::observation("D", 3).to_string(), "D.O.3");
        assert_eq!(RoutingKey::command("D", 4).to_string(), "D.C.4");
        assert_eq!(RoutingKey::command_response("D", 4).to_string(), "D.CR.4");
        assert_eq!(RoutingKey::pulse("D", 0).to_string(), "D.P.0");
    }

    #[test]
    fn parses_command_key() {
        let key = RoutingKey::parse("DEV001.C.12").unwrap();
        assert_eq!(key, RoutingKey::command("DEV001", 12));
    }

    #[test]
    fn parses_unknown_class() {
        let key = RoutingKey::parse("DEV001.ZZ.1").unwrap();
        assert_eq!(key.class, MessageClass::Unknown("ZZ".into()));
    }

    #[test]
    fn missing_segments_do_not_parse() {
        assert!(RoutingKey::parse("").is_none());
        assert!(RoutingKey::parse("DEV001").is_none());
        assert!(RoutingKey::parse(".C.1").is_none());
        assert!(RoutingKey::parse("DEV001..1").is_none());
    }

    #[test]
    fn non_numeric_subject_is_absent() {
        let key = RoutingKey::parse("DEV001.P.x").unwrap();
        assert_eq!(key.class, MessageClass::Pulse);
        assert_eq!(key.subject_id, None);
    }
}
