//! Ping command - checks that the control plane answers.

use crate::device::Device;
use anyhow::Result;
use fieldlink_client::ControlPlane;

/// Probe the control plane and print its clock.
pub async fn run(device: &Device) -> Result<()> {
    let control = device.control_plane()?;
    println!("Service: {}", control.base_url());

    if !control.ping().await {
        anyhow::bail!("Service unreachable");
    }
    println!("  Reachable: yes");

    match control.server_time().await {
        Ok(time) => println!("  Server time: {}", time.to_rfc3339()),
        Err(e) => {
            tracing::debug!("Server time unavailable: {}", e);
            println!("  Server time: unavailable");
        }
    }

    Ok(())
}
