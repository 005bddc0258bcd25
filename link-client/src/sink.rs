//! Direct delivery path for observations.

use crate::control::{ControlPlane, HttpControlPlane, MockControlPlane};
use crate::error::TransportError;
use async_trait::async_trait;
use fieldlink_types::ObservationBatch;

/// Somewhere observations can be delivered right now, if it is reachable.
///
/// The store-and-forward controller probes with `is_reachable()` before
/// draining and calls `deliver()` once per slice.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Cheap reachability probe.
    async fn is_reachable(&self) -> bool;

    /// Deliver a batch. Either the whole batch is accepted or an error is returned.
    async fn deliver(&self, batch: &ObservationBatch) -> Result<(), TransportError>;
}

#[async_trait]
impl ObservationSink for HttpControlPlane {
    async fn is_reachable(&self) -> bool {
        self.ping().await
    }

    async fn deliver(&self, batch: &ObservationBatch) -> Result<(), TransportError> {
        self.post_observations(batch).await
    }
}

#[async_trait]
impl ObservationSink for MockControlPlane {
    async fn is_reachable(&self) -> bool {
        self.ping().await
    }

    async fn deliver(&self, batch: &ObservationBatch) -> Result<(), TransportError> {
        self.post_observations(batch).await
    }
}
