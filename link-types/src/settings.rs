//! Device settings snapshots.

use crate::values::DataKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One setting value, raw text plus its declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SettingValue {
    /// Setting id.
    pub id: i32,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Declared kind of `value`.
    #[serde(rename = "DataType")]
    pub data_kind: DataKind,
    /// True if the service default is in effect.
    #[serde(rename = "IsDefaultValue", default)]
    pub is_default: bool,
    /// Raw value.
    pub value: String,
}

/// The full set of settings for a device at one point in time.
///
/// Always replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// Device the settings belong to.
    #[serde(rename = "MID")]
    pub mid: String,
    /// When the service produced the snapshot.
    #[serde(rename = "LastUpdatedOn")]
    pub fetched_at: DateTime<Utc>,
    /// Values in service order.
    #[serde(rename = "Values", default)]
    pub values: Vec<SettingValue>,
}

impl SettingsSnapshot {
    /// Find a value by setting id. The first entry wins if ids repeat.
    pub fn get(&self, id: i32) -> Option<&SettingValue> {
        self.values.iter().find(|v| v.id == id)
    }
}
