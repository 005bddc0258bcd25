//! Buffer commands - log, drain, count and clear buffered observations.

use crate::device::Device;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fieldlink_client::{DrainOutcome, ForwardError, LogOutcome};
use fieldlink_core::codec;
use fieldlink_types::{DataKind, Observation};

/// Which records `clear` touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    /// Soft-clear every record with id at or below this one.
    UpTo(i64),
    /// Soft-clear records observed within the inclusive range.
    Range(DateTime<Utc>, DateTime<Utc>),
    /// Soft-clear the whole backlog.
    All,
    /// Delete every record.
    Purge,
}

/// Print the number of pending records.
pub async fn pending(device: &Device) -> Result<()> {
    let count = device.store().await?.count_pending().await?;
    println!("{} pending", count);
    Ok(())
}

/// Upload the backlog.
pub async fn drain(device: &Device) -> Result<()> {
    let forwarder = device.forwarder().await?;

    match forwarder.drain_buffer().await {
        Ok(DrainOutcome::Empty) => println!("Nothing to upload"),
        Ok(DrainOutcome::Drained { delivered }) => println!("Uploaded {} records", delivered),
        Err(ForwardError::Unreachable) => {
            let left = forwarder.pending().await?;
            anyhow::bail!("Service unreachable, {} records still pending", left);
        }
        Err(e) => {
            let left = forwarder.pending().await?;
            return Err(e).context(format!("Drain incomplete, {} records still pending", left));
        }
    }

    Ok(())
}

/// Log one observation, uploading it directly when `attempt_upload` is set.
pub async fn log(
    device: &Device,
    observation_id: i32,
    kind: DataKind,
    value: &str,
    attempt_upload: bool,
) -> Result<()> {
    let value = codec::decode(kind, value)
        .with_context(|| format!("Invalid {} value '{}'", kind, value))?;
    let observation = Observation::now(value);

    let forwarder = device.forwarder().await?;
    match forwarder
        .log_observation(observation_id, &observation, attempt_upload)
        .await?
    {
        LogOutcome::Delivered => println!("Delivered observation {}", observation_id),
        LogOutcome::Buffered { .. } => println!("Buffered observation {}", observation_id),
    }

    Ok(())
}

/// Clear records from the buffer.
pub async fn clear(device: &Device, target: ClearTarget) -> Result<()> {
    let store = device.store().await?;

    let (count, verb) = match target {
        ClearTarget::UpTo(max_id) => (store.mark_uploaded_up_to(max_id).await?, "Cleared"),
        ClearTarget::Range(from, to) => {
            if from > to {
                anyhow::bail!("--from must not be after --to");
            }
            (store.mark_uploaded_in_range(from, to).await?, "Cleared")
        }
        ClearTarget::All => (store.mark_all_uploaded().await?, "Cleared"),
        ClearTarget::Purge => (store.purge().await?, "Deleted"),
    };
    println!("{} {} records", verb, count);

    Ok(())
}
