//! # fieldlink
//!
//! Command-line tool for operating a fieldlink device from a shell.
//!
//! ## Commands
//!
//! - `ping`: Check that the service is reachable
//! - `pending`: Count buffered observations
//! - `drain`: Upload the buffered backlog
//! - `log`: Log one observation (delivered or buffered)
//! - `clear`: Soft- or hard-clear buffered observations
//! - `settings`: Show the device settings
//!
//! ## Example
//!
//! ```bash
//! # Log a temperature reading, buffering it if the network is down
//! fieldlink log 42 double 21.5
//!
//! # Later, upload whatever was buffered
//! fieldlink drain
//!
//! # Show settings without touching the network
//! fieldlink settings --offline
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use fieldlink_types::DataKind;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod device;

use commands::{buffer, ping, settings};
use device::Device;

/// Command-line tool for operating a fieldlink device.
#[derive(Parser, Debug)]
#[command(name = "fieldlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: fieldlink.toml in the platform config directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the service is reachable and show its time
    Ping,

    /// Count buffered observations awaiting upload
    Pending,

    /// Upload the buffered backlog in insertion order
    Drain,

    /// Log one observation
    Log {
        /// Observation id
        observation_id: i32,

        /// Data kind (boolean, double, integer, position, string, statistics)
        kind: DataKind,

        /// Value in the buffer's text encoding, e.g. "21.5" or "59.9,10.7"
        value: String,

        /// Buffer without trying to upload
        #[arg(long)]
        buffer_only: bool,
    },

    /// Clear buffered observations
    #[command(group(
        ArgGroup::new("target")
            .required(true)
            .args(["up_to", "from", "all", "purge"])
    ))]
    Clear {
        /// Mark everything up to and including this record id as uploaded
        #[arg(long)]
        up_to: Option<i64>,

        /// Mark records observed from this instant (RFC 3339) as uploaded
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// End of the --from range, inclusive (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Mark the whole backlog as uploaded
        #[arg(long)]
        all: bool,

        /// Delete every buffered record
        #[arg(long)]
        purge: bool,
    },

    /// Show the device settings
    Settings {
        /// Use the buffered copy without contacting the service
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let device = Device::load(&config_path)?;

    match cli.command {
        Commands::Ping => {
            ping::run(&device).await?;
        }
        Commands::Pending => {
            buffer::pending(&device).await?;
        }
        Commands::Drain => {
            buffer::drain(&device).await?;
        }
        Commands::Log {
            observation_id,
            kind,
            value,
            buffer_only,
        } => {
            buffer::log(&device, observation_id, kind, &value, !buffer_only).await?;
        }
        Commands::Clear {
            up_to,
            from,
            to,
            all,
            purge,
        } => {
            let target = match (up_to, from.zip(to), all, purge) {
                (Some(id), _, _, _) => buffer::ClearTarget::UpTo(id),
                (_, Some((from, to)), _, _) => buffer::ClearTarget::Range(from, to),
                (_, _, true, _) => buffer::ClearTarget::All,
                (_, _, _, true) => buffer::ClearTarget::Purge,
                _ => anyhow::bail!("Must specify --up-to, --from/--to, --all or --purge"),
            };
            buffer::clear(&device, target).await?;
        }
        Commands::Settings { offline } => {
            settings::run(&device, offline).await?;
        }
    }

    Ok(())
}

/// Get the default configuration file path.
fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("net", "fieldlink", "fieldlink")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join("fieldlink.toml"))
}
