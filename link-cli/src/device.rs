//! Device setup shared by every command.

use anyhow::{Context, Result};
use fieldlink_client::{BufferStore, ClientConfig, Forwarder, HttpControlPlane};
use std::path::{Path, PathBuf};

/// A loaded configuration plus where it came from.
#[derive(Debug)]
pub struct Device {
    /// Parsed configuration.
    pub config: ClientConfig,
    /// Buffer file, relative paths resolved against the config file's directory.
    pub buffer_path: PathBuf,
}

impl Device {
    /// Load and validate the configuration file.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = ClientConfig::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;

        let buffer_path = if config.buffer.path.is_absolute() {
            config.buffer.path.clone()
        } else {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&config.buffer.path)
        };

        Ok(Self {
            config,
            buffer_path,
        })
    }

    /// HTTP client for the control plane.
    pub fn control_plane(&self) -> Result<HttpControlPlane> {
        HttpControlPlane::new(
            &self.config.device.endpoint(),
            self.config.device.credentials(),
            self.config.timeout(),
            self.config.network.ignore_ssl_certificate_errors,
        )
        .context("Failed to create HTTP client")
    }

    /// Open the buffer file.
    pub async fn store(&self) -> Result<BufferStore> {
        BufferStore::open(&self.buffer_path)
            .await
            .with_context(|| format!("Failed to open buffer {}", self.buffer_path.display()))
    }

    /// Store-and-forward controller over HTTP.
    pub async fn forwarder(&self) -> Result<Forwarder<HttpControlPlane>> {
        let control = self
            .control_plane()?
            .with_notify_listeners(self.config.buffer.notify_listeners_on_upload);
        Ok(Forwarder::new(control, self.store().await?).with_upload_limit(self.config.upload_limit()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Config pointing at a closed local port, so every network call fails fast.
    pub(crate) fn write_config(dir: &Path, buffer: &str) -> PathBuf {
        let path = dir.join("fieldlink.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[device]\nmid = \"DEV001\"\npre_shared_key = \"secret\"\nhost = \"127.0.0.1\"\nport = 1\nuse_https = false\n\n[buffer]\npath = \"{buffer}\"\n\n[network]\ntimeout_secs = 2"
        )
        .unwrap();
        path
    }

    #[test]
    fn relative_buffer_path_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "buffer.db");

        let device = Device::load(&path).unwrap();
        assert_eq!(device.buffer_path, dir.path().join("buffer.db"));
    }

    #[test]
    fn missing_config_fails_with_context() {
        let err = Device::load(Path::new("/nonexistent/fieldlink.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
    }

    #[tokio::test]
    async fn store_opens_in_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "buffer.db");

        let device = Device::load(&path).unwrap();
        device.store().await.unwrap();
        assert!(dir.path().join("buffer.db").exists());
    }
}
