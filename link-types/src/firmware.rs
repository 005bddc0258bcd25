//! Firmware release and patch descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of the firmware release currently assigned to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirmwareReleaseDescriptor {
    /// Release id.
    #[serde(default)]
    pub id: i32,
    /// Version number of the release.
    #[serde(default)]
    pub version_no: i32,
    /// When the release was published.
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    /// Blob size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Base64 MD5 of the blob, as published by the service.
    #[serde(rename = "FirmwareMD5", default)]
    pub firmware_md5: String,
    /// Unauthenticated download location of the blob.
    pub url: String,
}

/// Metadata of a patch from one firmware version to the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirmwarePatchDescriptor {
    /// Version the patch applies to.
    #[serde(default)]
    pub from_version_no: i32,
    /// Version the patch produces.
    #[serde(default)]
    pub to_version_no: i32,
    /// Patch size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Base64 MD5 of the patch, as published by the service.
    #[serde(rename = "PatchMD5", default)]
    pub patch_md5: String,
    /// Download location of the patch.
    pub url: String,
}
