//! Durable buffer for observations and settings.
//!
//! Records are appended with a store-assigned, strictly increasing id. The
//! pending backlog is exactly the set of records with `uploaded = false`,
//! and ascending id is the only delivery order.

mod sqlite;

pub use sqlite::BufferStore;

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use fieldlink_core::codec;
use fieldlink_types::{DataKind, Observation, ObservationBatch, ObservationBatchBuilder};

/// A record as stored in the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRecord {
    /// Store-assigned id, unique and strictly increasing.
    pub id: i64,
    /// Observation (or setting) id.
    pub subject_id: i32,
    /// Kind tag selecting the payload decoder.
    pub data_kind: DataKind,
    /// When the value was observed.
    pub timestamp: DateTime<Utc>,
    /// String-encoded value.
    pub payload: String,
    /// True once delivery was confirmed (soft clear).
    pub uploaded: bool,
}

impl BufferedRecord {
    /// Decode the payload back into an observation.
    pub fn to_observation(&self) -> Result<Observation, StoreError> {
        let value = codec::decode(self.data_kind, &self.payload)?;
        Ok(Observation::new(self.timestamp, value))
    }
}

/// A record to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Observation (or setting) id.
    pub subject_id: i32,
    /// Kind tag. Must be bufferable.
    pub data_kind: DataKind,
    /// When the value was observed.
    pub timestamp: DateTime<Utc>,
    /// String-encoded value.
    pub payload: String,
}

impl NewRecord {
    /// Encode an observation for the buffer.
    pub fn from_observation(subject_id: i32, observation: &Observation) -> Self {
        let (data_kind, payload) = codec::encode(&observation.value);
        Self {
            subject_id,
            data_kind,
            timestamp: observation.timestamp,
            payload,
        }
    }

    /// Encode every observation of a batch, in batch order.
    pub fn from_batch(batch: &ObservationBatch) -> Vec<Self> {
        batch
            .iter()
            .map(|(id, obs)| Self::from_observation(id, obs))
            .collect()
    }
}

/// Rebuild a delivery batch from buffered records, preserving their order.
pub fn batch_from_records(records: &[BufferedRecord]) -> Result<ObservationBatch, StoreError> {
    let mut builder = ObservationBatchBuilder::default();
    for record in records {
        builder.push(record.subject_id, record.to_observation()?);
    }
    Ok(builder.build())
}

/// Maximum number of records per upload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadLimit {
    /// At most this many records.
    Rows(u32),
    /// Everything pending in one slice.
    Unlimited,
}

impl UploadLimit {
    /// Default slice size.
    pub const DEFAULT_ROWS: u32 = 1000;

    /// Interpret a configured value: zero or negative means unlimited.
    pub fn from_config(value: i64) -> Self {
        if value <= 0 {
            Self::Unlimited
        } else {
            Self::Rows(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }

    /// SQLite `LIMIT` value (`-1` is unlimited).
    pub(crate) fn as_sql(self) -> i64 {
        match self {
            Self::Rows(n) => i64::from(n),
            Self::Unlimited => -1,
        }
    }
}

impl Default for UploadLimit {
    fn default() -> Self {
        Self::Rows(Self::DEFAULT_ROWS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fieldlink_types::ObservationValue;

    #[test]
    fn upload_limit_from_config() {
        assert_eq!(UploadLimit::from_config(1000), UploadLimit::Rows(1000));
        assert_eq!(UploadLimit::from_config(0), UploadLimit::Unlimited);
        assert_eq!(UploadLimit::from_config(-5), UploadLimit::Unlimited);
        assert_eq!(UploadLimit::default(), UploadLimit::Rows(1000));
        assert_eq!(UploadLimit::Unlimited.as_sql(), -1);
    }

    #[test]
    fn records_rebuild_batch_in_order() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records: Vec<BufferedRecord> = [(42, "1"), (42, "2"), (7, "3")]
            .iter()
            .enumerate()
            .map(|(i, (subject, payload))| BufferedRecord {
                id: i as i64 + 1,
                subject_id: *subject,
                data_kind: DataKind::Integer,
                timestamp: ts,
                payload: payload.to_string(),
                uploaded: false,
            })
            .collect();

        let batch = batch_from_records(&records).unwrap();
        assert_eq!(batch.groups().len(), 2);
        let values: Vec<ObservationValue> = batch.iter().map(|(_, o)| o.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                ObservationValue::Integer(1),
                ObservationValue::Integer(2),
                ObservationValue::Integer(3)
            ]
        );
    }

    #[test]
    fn undecodable_record_fails_the_batch() {
        let record = BufferedRecord {
            id: 1,
            subject_id: 1,
            data_kind: DataKind::Integer,
            timestamp: Utc::now(),
            payload: "abc".into(),
            uploaded: false,
        };
        assert!(matches!(
            batch_from_records(&[record]),
            Err(StoreError::Data(_))
        ));
    }
}
