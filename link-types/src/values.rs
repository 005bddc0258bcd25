//! Typed observation values.

use crate::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data kind tag carried by observations and settings.
///
/// Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DataKind {
    /// Kind not specified.
    Unknown,
    /// Opaque bytes.
    Binary,
    /// True/false.
    Boolean,
    /// 64-bit float.
    Double,
    /// 32-bit signed integer.
    Integer,
    /// Geographic position.
    Position,
    /// UTF-8 text.
    String,
    /// Descriptive statistics over a time window.
    Statistics,
}

impl DataKind {
    /// Integer code used on the wire and in the buffer.
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Binary => 1,
            Self::Boolean => 2,
            Self::Double => 3,
            Self::Integer => 4,
            Self::Position => 5,
            Self::String => 6,
            Self::Statistics => 7,
        }
    }

    /// Map an integer code back to a kind.
    pub fn from_code(code: i64) -> Result<Self, DataError> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Binary),
            2 => Ok(Self::Boolean),
            3 => Ok(Self::Double),
            4 => Ok(Self::Integer),
            5 => Ok(Self::Position),
            6 => Ok(Self::String),
            7 => Ok(Self::Statistics),
            other => Err(DataError::UnknownKindCode(other)),
        }
    }

    /// Whether values of this kind can be string-encoded into the buffer.
    pub fn is_bufferable(self) -> bool {
        !matches!(self, Self::Unknown | Self::Binary)
    }

    /// Lowercase name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Binary => "binary",
            Self::Boolean => "boolean",
            Self::Double => "double",
            Self::Integer => "integer",
            Self::Position => "position",
            Self::String => "string",
            Self::Statistics => "statistics",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i64> for DataKind {
    type Error = DataError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<DataKind> for i64 {
    fn from(kind: DataKind) -> Self {
        kind.code()
    }
}

impl std::str::FromStr for DataKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Unknown,
            Self::Binary,
            Self::Boolean,
            Self::Double,
            Self::Integer,
            Self::Position,
            Self::String,
            Self::Statistics,
        ]
        .into_iter()
        .find(|kind| kind.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| DataError::malformed(Self::Unknown, format!("no data kind named '{s}'")))
    }
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// Descriptive statistics computed over `[from, to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptiveStatistics {
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end.
    pub to: DateTime<Utc>,
    /// Number of samples.
    pub count: i32,
    /// Smallest sample.
    pub minimum: f64,
    /// Largest sample.
    pub maximum: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Median.
    pub median: f64,
    /// Standard deviation.
    pub std_dev: f64,
}

/// The value part of an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ObservationValue {
    /// Boolean value.
    Boolean(bool),
    /// Double value.
    Double(f64),
    /// Integer value.
    Integer(i32),
    /// Position value.
    Position(Position),
    /// String value.
    String(String),
    /// Statistics value.
    Statistics(DescriptiveStatistics),
}

impl ObservationValue {
    /// Data kind of this value.
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Boolean(_) => DataKind::Boolean,
            Self::Double(_) => DataKind::Double,
            Self::Integer(_) => DataKind::Integer,
            Self::Position(_) => DataKind::Position,
            Self::String(_) => DataKind::String,
            Self::Statistics(_) => DataKind::Statistics,
        }
    }
}

/// A timestamped value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Observation {
    /// When the value was observed (UTC).
    pub timestamp: DateTime<Utc>,
    /// The observed value.
    pub value: ObservationValue,
}

impl Observation {
    /// Create an observation.
    pub fn new(timestamp: DateTime<Utc>, value: ObservationValue) -> Self {
        Self { timestamp, value }
    }

    /// Create an observation stamped with the current time.
    pub fn now(value: ObservationValue) -> Self {
        Self::new(Utc::now(), value)
    }

    /// Data kind of the value.
    pub fn kind(&self) -> DataKind {
        self.value.kind()
    }
}
