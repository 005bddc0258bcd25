//! Device identity.

use std::fmt;

/// Identity of one device: its MID and the pre-shared key used for authentication.
///
/// The key is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    mid: String,
    pre_shared_key: String,
}

impl DeviceCredentials {
    /// Create credentials for a device.
    pub fn new(mid: impl Into<String>, pre_shared_key: impl Into<String>) -> Self {
        Self {
            mid: mid.into(),
            pre_shared_key: pre_shared_key.into(),
        }
    }

    /// The device identifier.
    pub fn mid(&self) -> &str {
        &self.mid
    }

    /// The pre-shared key.
    pub fn pre_shared_key(&self) -> &str {
        &self.pre_shared_key
    }
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("mid", &self.mid)
            .field("pre_shared_key", &"[REDACTED]")
            .finish()
    }
}
