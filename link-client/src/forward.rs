//! Store-and-forward controller.
//!
//! Every logging call first tries to empty the backlog and deliver directly.
//! Only when that fails does the new data go into the buffer, so a healthy
//! network never grows the buffer.
//!
//! ```text
//! log_observations ─► drain_buffer ─► sink.deliver(batch) ─► Delivered
//!                          │                 │
//!                          └── failure ──────┴──► store.append_all ─► Buffered
//! ```
//!
//! Draining delivers pending records in ascending id order, one slice of at
//! most `upload_limit` records at a time, and marks each slice uploaded only
//! after the sink accepted it.

use crate::error::ForwardError;
use crate::sink::ObservationSink;
use crate::store::{batch_from_records, BufferStore, NewRecord, UploadLimit};
use chrono::{DateTime, Utc};
use fieldlink_types::{Observation, ObservationBatch};

/// What happened to a logged batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// Delivered directly; nothing was buffered.
    Delivered,
    /// Written to the buffer for a later drain.
    Buffered {
        /// Number of records appended.
        records: usize,
    },
}

/// Result of a successful drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was pending; the sink was not probed.
    Empty,
    /// The backlog was delivered completely.
    Drained {
        /// Records delivered in this drain.
        delivered: usize,
    },
}

/// Buffer-or-deliver controller for one sink and one buffer file.
#[derive(Debug, Clone)]
pub struct Forwarder<S> {
    sink: S,
    store: BufferStore,
    upload_limit: UploadLimit,
}

impl<S: ObservationSink> Forwarder<S> {
    /// Create a controller with the default upload slice size.
    pub fn new(sink: S, store: BufferStore) -> Self {
        Self {
            sink,
            store,
            upload_limit: UploadLimit::default(),
        }
    }

    /// Set the upload slice size.
    pub fn with_upload_limit(mut self, limit: UploadLimit) -> Self {
        self.upload_limit = limit;
        self
    }

    /// The delivery sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The buffer.
    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    /// Log a batch: deliver it directly if the backlog drains, buffer it otherwise.
    ///
    /// With `attempt_upload == false` the batch is buffered without touching
    /// the network.
    ///
    /// # Errors
    ///
    /// Only buffer failures are errors. Delivery failures end in `Buffered`.
    pub async fn log_observations(
        &self,
        batch: &ObservationBatch,
        attempt_upload: bool,
    ) -> Result<LogOutcome, ForwardError> {
        if attempt_upload {
            match self.drain_buffer().await {
                Ok(_) => match self.sink.deliver(batch).await {
                    Ok(()) => {
                        tracing::debug!("Delivered {} observations directly", batch.len());
                        return Ok(LogOutcome::Delivered);
                    }
                    Err(e) => {
                        tracing::warn!("Direct delivery failed, buffering: {}", e);
                    }
                },
                Err(e) => {
                    tracing::debug!("Backlog not drained, buffering: {}", e);
                }
            }
        }

        let records = NewRecord::from_batch(batch);
        self.store.append_all(&records).await?;
        Ok(LogOutcome::Buffered {
            records: records.len(),
        })
    }

    /// Log one observation.
    pub async fn log_observation(
        &self,
        observation_id: i32,
        observation: &Observation,
        attempt_upload: bool,
    ) -> Result<LogOutcome, ForwardError> {
        let batch = ObservationBatch::single(observation_id, observation.clone());
        self.log_observations(&batch, attempt_upload).await
    }

    /// Deliver the whole backlog in id order.
    ///
    /// # Errors
    ///
    /// - [`ForwardError::Unreachable`] when the backlog is non-empty and the
    ///   probe fails; nothing is attempted.
    /// - [`ForwardError::Delivery`] when a slice is refused; earlier slices
    ///   stay marked uploaded, the refused slice and everything after it stay
    ///   pending.
    pub async fn drain_buffer(&self) -> Result<DrainOutcome, ForwardError> {
        if self.store.count_pending().await? == 0 {
            return Ok(DrainOutcome::Empty);
        }
        if !self.sink.is_reachable().await {
            return Err(ForwardError::Unreachable);
        }

        let mut delivered = 0;
        loop {
            let slice = self.store.scan_pending(self.upload_limit).await?;
            let Some(max_id) = slice.last().map(|record| record.id) else {
                break;
            };

            let batch = batch_from_records(&slice)?;
            if let Err(source) = self.sink.deliver(&batch).await {
                tracing::warn!(
                    "Drain stopped after {} records (next slice up to id {}): {}",
                    delivered,
                    max_id,
                    source
                );
                return Err(ForwardError::Delivery { delivered, source });
            }

            self.store.mark_uploaded_up_to(max_id).await?;
            delivered += slice.len();
            tracing::debug!("Delivered buffered records up to id {}", max_id);
        }

        tracing::info!("Buffer drained ({} records delivered)", delivered);
        Ok(DrainOutcome::Drained { delivered })
    }

    /// Number of pending records.
    pub async fn pending(&self) -> Result<u64, ForwardError> {
        Ok(self.store.count_pending().await?)
    }

    /// Soft-clear every pending record with `id <= max_id`.
    pub async fn clear_up_to(&self, max_id: i64) -> Result<u64, ForwardError> {
        Ok(self.store.mark_uploaded_up_to(max_id).await?)
    }

    /// Soft-clear pending records observed within `[from, to]`.
    pub async fn clear_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, ForwardError> {
        Ok(self.store.mark_uploaded_in_range(from, to).await?)
    }

    /// Soft-clear the whole backlog.
    pub async fn clear_all(&self) -> Result<u64, ForwardError> {
        Ok(self.store.mark_all_uploaded().await?)
    }

    /// Hard-delete every buffered record.
    pub async fn purge(&self) -> Result<u64, ForwardError> {
        Ok(self.store.purge().await?)
    }
}
