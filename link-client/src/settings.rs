//! Settings cache with fallback to the buffered copy.
//!
//! `refresh()` prefers the control plane. A fetched snapshot is written to the
//! buffer (drop-and-reinsert) before it becomes active, so the durable copy is
//! never older than what callers have already seen.

use crate::control::ControlPlane;
use crate::error::SettingsError;
use crate::store::BufferStore;
use fieldlink_core::codec;
use fieldlink_types::{SettingValue, SettingsSnapshot};
use tokio::sync::RwLock;

/// Where the active snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOrigin {
    /// Freshly fetched and persisted.
    Remote,
    /// Remote fetch failed; the last persisted copy is active.
    Buffered,
}

/// Last-known-good settings for one device.
pub struct SettingsCache<C> {
    control: C,
    store: BufferStore,
    active: RwLock<Option<SettingsSnapshot>>,
}

impl<C: ControlPlane> SettingsCache<C> {
    /// Create an empty cache. Nothing is loaded until `refresh()` or
    /// `load_from_buffer()`.
    pub fn new(control: C, store: BufferStore) -> Self {
        Self {
            control,
            store,
            active: RwLock::new(None),
        }
    }

    /// Fetch the remote snapshot, falling back to the buffered one.
    ///
    /// # Errors
    ///
    /// - [`SettingsError::Unavailable`] if the fetch failed and nothing was
    ///   ever persisted; the active snapshot is left as it was.
    /// - [`SettingsError::Store`] if the buffer cannot be read or written.
    pub async fn refresh(&self) -> Result<SettingsOrigin, SettingsError> {
        match self.control.fetch_settings().await {
            Ok(snapshot) => {
                self.store.replace_settings(&snapshot).await?;
                tracing::info!(
                    "Settings refreshed ({} values, updated {})",
                    snapshot.values.len(),
                    snapshot.fetched_at
                );
                *self.active.write().await = Some(snapshot);
                Ok(SettingsOrigin::Remote)
            }
            Err(e) => {
                tracing::warn!("Settings fetch failed, using buffered copy: {}", e);
                match self.store.load_settings().await? {
                    Some(snapshot) => {
                        *self.active.write().await = Some(snapshot);
                        Ok(SettingsOrigin::Buffered)
                    }
                    None => Err(SettingsError::Unavailable(e)),
                }
            }
        }
    }

    /// Make the buffered snapshot active. Returns false if none was persisted.
    pub async fn load_from_buffer(&self) -> Result<bool, SettingsError> {
        match self.store.load_settings().await? {
            Some(snapshot) => {
                *self.active.write().await = Some(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The active snapshot, if any.
    pub async fn snapshot(&self) -> Option<SettingsSnapshot> {
        self.active.read().await.clone()
    }

    /// Look up one value in the active snapshot.
    pub async fn get_value(&self, id: i32) -> Result<SettingValue, SettingsError> {
        let active = self.active.read().await;
        let snapshot = active.as_ref().ok_or(SettingsError::NotInitialized)?;
        snapshot.get(id).cloned().ok_or(SettingsError::NotFound(id))
    }

    /// Value parsed as a boolean.
    pub async fn get_bool(&self, id: i32) -> Result<bool, SettingsError> {
        let value = self.get_value(id).await?;
        Ok(codec::decode_bool(&value.value)?)
    }

    /// Value parsed as a double.
    pub async fn get_double(&self, id: i32) -> Result<f64, SettingsError> {
        let value = self.get_value(id).await?;
        Ok(codec::decode_double(&value.value)?)
    }

    /// Value parsed as a 32-bit integer.
    pub async fn get_integer(&self, id: i32) -> Result<i32, SettingsError> {
        let value = self.get_value(id).await?;
        Ok(codec::decode_integer(&value.value)?)
    }

    /// Raw value text.
    pub async fn get_string(&self, id: i32) -> Result<String, SettingsError> {
        Ok(self.get_value(id).await?.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MockControlPlane;
    use chrono::{TimeZone, Utc};
    use fieldlink_types::DataKind;
    use tempfile::TempDir;

    fn snapshot(interval: &str) -> SettingsSnapshot {
        SettingsSnapshot {
            mid: "DEV001".into(),
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            values: vec![
                SettingValue {
                    id: 1,
                    name: "Interval".into(),
                    data_kind: DataKind::Integer,
                    is_default: false,
                    value: interval.into(),
                },
                SettingValue {
                    id: 2,
                    name: "Enabled".into(),
                    data_kind: DataKind::Boolean,
                    is_default: true,
                    value: "true".into(),
                },
                SettingValue {
                    id: 3,
                    name: "Gain".into(),
                    data_kind: DataKind::Double,
                    is_default: false,
                    value: "1.5".into(),
                },
            ],
        }
    }

    async fn setup() -> (TempDir, MockControlPlane, BufferStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BufferStore::open(&dir.path().join("buffer.db")).await.unwrap();
        (dir, MockControlPlane::new(), store)
    }

    // ===========================================
    // Refresh and fallback
    // ===========================================

    #[tokio::test]
    async fn refresh_persists_remote_snapshot() {
        let (_dir, control, store) = setup().await;
        control.set_settings(snapshot("30"));
        let cache = SettingsCache::new(control, store.clone());

        assert_eq!(cache.refresh().await.unwrap(), SettingsOrigin::Remote);
        assert_eq!(cache.snapshot().await, Some(snapshot("30")));
        assert_eq!(store.load_settings().await.unwrap(), Some(snapshot("30")));
    }

    #[tokio::test]
    async fn unreachable_refresh_uses_last_persisted() {
        let (_dir, control, store) = setup().await;
        control.set_settings(snapshot("30"));
        let cache = SettingsCache::new(control.clone(), store.clone());
        cache.refresh().await.unwrap();

        // A new process: fresh cache, service offline
        control.set_reachable(false);
        let restarted = SettingsCache::new(control, store);

        assert_eq!(restarted.refresh().await.unwrap(), SettingsOrigin::Buffered);
        assert_eq!(restarted.snapshot().await, Some(snapshot("30")));
    }

    #[tokio::test]
    async fn unreachable_refresh_without_copy_is_unavailable() {
        let (_dir, control, store) = setup().await;
        control.set_reachable(false);
        let cache = SettingsCache::new(control, store);

        assert!(matches!(
            cache.refresh().await,
            Err(SettingsError::Unavailable(_))
        ));
        assert_eq!(cache.snapshot().await, None);
    }

    #[tokio::test]
    async fn refresh_replaces_wholesale() {
        let (_dir, control, store) = setup().await;
        control.set_settings(snapshot("30"));
        let cache = SettingsCache::new(control.clone(), store.clone());
        cache.refresh().await.unwrap();

        let mut smaller = snapshot("45");
        smaller.values.truncate(1);
        control.set_settings(smaller.clone());
        cache.refresh().await.unwrap();

        assert_eq!(store.load_settings().await.unwrap(), Some(smaller));
        assert!(matches!(
            cache.get_value(2).await,
            Err(SettingsError::NotFound(2))
        ));
    }

    #[tokio::test]
    async fn load_from_buffer() {
        let (_dir, control, store) = setup().await;
        let cache = SettingsCache::new(control, store.clone());
        assert!(!cache.load_from_buffer().await.unwrap());

        store.replace_settings(&snapshot("10")).await.unwrap();
        assert!(cache.load_from_buffer().await.unwrap());
        assert_eq!(cache.get_integer(1).await.unwrap(), 10);
    }

    // ===========================================
    // Lookup
    // ===========================================

    #[tokio::test]
    async fn lookup_before_load_is_not_initialized() {
        let (_dir, control, store) = setup().await;
        let cache = SettingsCache::new(control, store);

        assert!(matches!(
            cache.get_value(1).await,
            Err(SettingsError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn typed_getters() {
        let (_dir, control, store) = setup().await;
        control.set_settings(snapshot("30"));
        let cache = SettingsCache::new(control, store);
        cache.refresh().await.unwrap();

        assert_eq!(cache.get_integer(1).await.unwrap(), 30);
        assert!(cache.get_bool(2).await.unwrap());
        assert_eq!(cache.get_double(3).await.unwrap(), 1.5);
        assert_eq!(cache.get_string(1).await.unwrap(), "30");
        assert!(matches!(
            cache.get_integer(2).await,
            Err(SettingsError::Data(_))
        ));
        assert!(matches!(
            cache.get_bool(3).await,
            Err(SettingsError::Data(_))
        ));
        assert!(matches!(
            cache.get_double(2).await,
            Err(SettingsError::Data(_))
        ));
        assert!(matches!(
            cache.get_value(99).await,
            Err(SettingsError::NotFound(99))
        ));
    }
}
