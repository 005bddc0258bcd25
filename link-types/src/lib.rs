//! # fieldlink-types
//!
//! Data model shared by every fieldlink crate.
//!
//! - [`DeviceCredentials`] - Device identity (MID) and pre-shared key
//! - [`DataKind`], [`ObservationValue`], [`Observation`] - Typed time-series values
//! - [`ObservationBatch`] - Ordered, immutable groups of observations
//! - [`Command`], [`CommandResponse`], [`Pulse`], [`DeviceEvent`] - Messages exchanged with the service
//! - [`SettingsSnapshot`] - Last known device configuration
//! - [`DeviceConnection`] - Broker parameters handed out by the control plane
//! - [`FirmwareReleaseDescriptor`], [`FirmwarePatchDescriptor`] - Firmware download metadata
//! - [`DataError`] - Encode/decode failures for typed values
//!
//! Wire shapes serialize with the service's PascalCase field names.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod error;
mod firmware;
mod ids;
mod messages;
mod settings;
mod values;

pub use batch::{IdentifiedObservations, ObservationBatch, ObservationBatchBuilder};
pub use error::DataError;
pub use firmware::{FirmwarePatchDescriptor, FirmwareReleaseDescriptor};
pub use ids::DeviceCredentials;
pub use messages::{
    BrokerNode, Command, CommandArgument, CommandResponse, DeviceConnection, DeviceEvent,
    EventCategory, Pulse, DEVICE_PULSE_ID,
};
pub use settings::{SettingValue, SettingsSnapshot};
pub use values::{DataKind, DescriptiveStatistics, Observation, ObservationValue, Position};
