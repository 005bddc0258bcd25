//! Control-plane abstraction.
//!
//! The control plane is the request/response side of the service: it hands
//! out broker parameters and settings and accepts observation uploads.
//!
//! - `ping()` probes reachability
//! - `connection_descriptor()` returns broker parameters for the live session
//! - `fetch_settings()` returns the current settings snapshot
//! - `post_observations()` uploads a batch

mod http;
mod mock;

pub use http::HttpControlPlane;
pub use mock::MockControlPlane;

use crate::error::TransportError;
use async_trait::async_trait;
use fieldlink_types::{DeviceConnection, ObservationBatch, SettingsSnapshot};

/// Where the control plane lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEndpoint {
    /// Host name or address.
    pub host: String,
    /// HTTPS instead of HTTP.
    pub use_https: bool,
    /// Port override.
    pub port: Option<u16>,
}

impl ControlEndpoint {
    /// Base address, e.g. `https://api.example.net:8443`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

/// Request/response operations the device needs from the service.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// True if the service answers a ping.
    async fn ping(&self) -> bool;

    /// Broker parameters for the live session.
    async fn connection_descriptor(&self) -> Result<DeviceConnection, TransportError>;

    /// The device's current settings.
    async fn fetch_settings(&self) -> Result<SettingsSnapshot, TransportError>;

    /// Upload a batch of observations.
    async fn post_observations(&self, batch: &ObservationBatch) -> Result<(), TransportError>;
}
