//! Broker heartbeat interval.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Heartbeat value outside `{0} ∪ [60, 3600]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid heartbeat interval {0}s: must be 0 (disabled) or between 60 and 3600")]
pub struct HeartbeatError(pub u32);

/// Heartbeat interval negotiated with the broker, in seconds.
///
/// Zero disables heartbeats. Any other value lies in `[60, 3600]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u32")]
pub struct HeartbeatInterval(u16);

impl HeartbeatInterval {
    /// Heartbeats turned off.
    pub const DISABLED: Self = Self(0);
    /// Shortest enabled interval.
    pub const MIN_SECS: u32 = 60;
    /// Longest enabled interval.
    pub const MAX_SECS: u32 = 3600;

    /// Validate an interval in seconds.
    pub fn new(secs: u32) -> Result<Self, HeartbeatError> {
        if secs == 0 || (Self::MIN_SECS..=Self::MAX_SECS).contains(&secs) {
            Ok(Self(secs as u16))
        } else {
            Err(HeartbeatError(secs))
        }
    }

    /// Interval in seconds (0 when disabled).
    pub fn as_secs(self) -> u16 {
        self.0
    }

    /// True when heartbeats are off.
    pub fn is_disabled(self) -> bool {
        self.0 == 0
    }

    /// Interval as a duration, `None` when disabled.
    pub fn as_duration(self) -> Option<Duration> {
        (!self.is_disabled()).then(|| Duration::from_secs(u64::from(self.0)))
    }
}

impl Default for HeartbeatInterval {
    fn default() -> Self {
        Self(60)
    }
}

impl TryFrom<u32> for HeartbeatInterval {
    type Error = HeartbeatError;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        Self::new(secs)
    }
}
