//! Mock control plane for testing.
//!
//! Serves canned descriptors and settings, captures uploaded batches and can
//! be switched offline or told to fail.

use super::ControlPlane;
use crate::error::TransportError;
use async_trait::async_trait;
use fieldlink_types::{BrokerNode, DeviceConnection, ObservationBatch, SettingsSnapshot};
use std::sync::{Arc, Mutex};

/// Mock control plane for testing.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Default)]
pub struct MockControlPlane {
    inner: Arc<Mutex<MockControlPlaneInner>>,
}

#[derive(Debug)]
struct MockControlPlaneInner {
    reachable: bool,
    descriptor: DeviceConnection,
    settings: Option<SettingsSnapshot>,
    posted: Vec<ObservationBatch>,
    posts_until_failure: Option<usize>,
    fail_next_descriptor: Option<String>,
    fail_next_post: Option<String>,
    pings: usize,
}

impl Default for MockControlPlaneInner {
    fn default() -> Self {
        Self {
            reachable: true,
            descriptor: DeviceConnection {
                node: Some(BrokerNode {
                    host: "localhost".to_string(),
                    encrypted_port: 5671,
                    unencrypted_port: 5672,
                }),
                backoff_seconds: None,
            },
            settings: None,
            posted: Vec::new(),
            posts_until_failure: None,
            fail_next_descriptor: None,
            fail_next_post: None,
            pings: 0,
        }
    }
}

impl MockControlPlane {
    /// Create a reachable mock with a localhost broker descriptor and no settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the whole service on or off.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().reachable = reachable;
    }

    /// Descriptor returned by `connection_descriptor()`.
    pub fn set_descriptor(&self, descriptor: DeviceConnection) {
        self.inner.lock().unwrap().descriptor = descriptor;
    }

    /// Snapshot returned by `fetch_settings()`.
    pub fn set_settings(&self, snapshot: SettingsSnapshot) {
        self.inner.lock().unwrap().settings = Some(snapshot);
    }

    /// Cause the next `connection_descriptor()` to fail.
    pub fn fail_next_descriptor(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_descriptor = Some(error.to_string());
    }

    /// Cause the next `post_observations()` to fail.
    pub fn fail_next_post(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_post = Some(error.to_string());
    }

    /// Accept `n` more uploads, then fail every upload until `reset()`.
    pub fn fail_posts_after(&self, n: usize) {
        self.inner.lock().unwrap().posts_until_failure = Some(n);
    }

    /// All batches accepted so far.
    pub fn posted_batches(&self) -> Vec<ObservationBatch> {
        self.inner.lock().unwrap().posted.clone()
    }

    /// Number of pings received.
    pub fn ping_count(&self) -> usize {
        self.inner.lock().unwrap().pings
    }

    /// Clear all state and failure injection.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockControlPlaneInner::default();
    }

    /// Clear failure injection only, keeping captured batches and settings.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.reachable = true;
        inner.posts_until_failure = None;
        inner.fail_next_post = None;
        inner.fail_next_descriptor = None;
    }
}

impl Clone for MockControlPlane {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn unreachable() -> TransportError {
    TransportError::ConnectionFailed("service unreachable".to_string())
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn ping(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.pings += 1;
        inner.reachable
    }

    async fn connection_descriptor(&self) -> Result<DeviceConnection, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(unreachable());
        }
        if let Some(error) = inner.fail_next_descriptor.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        Ok(inner.descriptor.clone())
    }

    async fn fetch_settings(&self) -> Result<SettingsSnapshot, TransportError> {
        let inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(unreachable());
        }
        inner.settings.clone().ok_or(TransportError::Http {
            status: 404,
            reason: "Not Found".to_string(),
        })
    }

    async fn post_observations(&self, batch: &ObservationBatch) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(unreachable());
        }
        if let Some(error) = inner.fail_next_post.take() {
            return Err(TransportError::Request(error));
        }
        if let Some(remaining) = inner.posts_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::Timeout);
            }
            *remaining -= 1;
        }
        inner.posted.push(batch.clone());
        Ok(())
    }
}
