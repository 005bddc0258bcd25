//! Settings command - shows the device settings.

use crate::device::Device;
use anyhow::{Context, Result};
use fieldlink_client::{SettingsCache, SettingsOrigin};

/// Load settings (remote first unless `offline`) and print them.
pub async fn run(device: &Device, offline: bool) -> Result<()> {
    let cache = SettingsCache::new(device.control_plane()?, device.store().await?);

    let origin = if offline {
        if !cache.load_from_buffer().await? {
            anyhow::bail!("No buffered settings. Run 'fieldlink settings' while online first.");
        }
        SettingsOrigin::Buffered
    } else {
        cache.refresh().await.context("Failed to load settings")?
    };

    let snapshot = cache
        .snapshot()
        .await
        .context("Settings missing after load")?;

    let source = match origin {
        SettingsOrigin::Remote => "service",
        SettingsOrigin::Buffered => "buffer",
    };
    println!(
        "Settings for {} (from {}, updated {})",
        snapshot.mid,
        source,
        snapshot.fetched_at.to_rfc3339()
    );

    if snapshot.values.is_empty() {
        println!("  (none)");
    }
    for value in &snapshot.values {
        let marker = if value.is_default { " (default)" } else { "" };
        println!(
            "  {:>5}  {:<24} {:<10} {}{}",
            value.id, value.name, value.data_kind, value.value, marker
        );
    }

    Ok(())
}
