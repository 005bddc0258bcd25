//! Text encoding of observation values.
//!
//! The buffer stores every value as `(kind, text)`. The kind tag selects the
//! parser on the way back, so a row with an unknown or non-textual kind can
//! never be decoded.
//!
//! | Kind       | Text                                             |
//! |------------|--------------------------------------------------|
//! | Boolean    | `true` / `false` (decode also takes `1` / `0`)   |
//! | Double     | shortest round-trip decimal                      |
//! | Integer    | decimal `i32`                                    |
//! | Position   | `lat,lon` or `lat,lon,alt`                       |
//! | String     | raw text                                         |
//! | Statistics | `from,to,count,min,max,mean,median,stddev`       |

use chrono::{DateTime, SecondsFormat, Utc};
use fieldlink_types::{DataError, DataKind, DescriptiveStatistics, ObservationValue, Position};

/// Encode a value as `(kind, text)`.
pub fn encode(value: &ObservationValue) -> (DataKind, String) {
    let text = match value {
        ObservationValue::Boolean(b) => b.to_string(),
        ObservationValue::Double(d) => d.to_string(),
        ObservationValue::Integer(i) => i.to_string(),
        ObservationValue::Position(p) => match p.altitude {
            Some(alt) => format!("{},{},{}", p.latitude, p.longitude, alt),
            None => format!("{},{}", p.latitude, p.longitude),
        },
        ObservationValue::String(s) => s.clone(),
        ObservationValue::Statistics(s) => format!(
            "{},{},{},{},{},{},{},{}",
            s.from.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            s.to.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            s.count,
            s.minimum,
            s.maximum,
            s.mean,
            s.median,
            s.std_dev
        ),
    };
    (value.kind(), text)
}

/// Decode `text` as a value of `kind`.
///
/// # Errors
///
/// [`DataError::UnsupportedKind`] for `Unknown` and `Binary`,
/// [`DataError::Malformed`] when the text does not parse.
pub fn decode(kind: DataKind, text: &str) -> Result<ObservationValue, DataError> {
    match kind {
        DataKind::Boolean => decode_bool(text).map(ObservationValue::Boolean),
        DataKind::Double => decode_double(text).map(ObservationValue::Double),
        DataKind::Integer => decode_integer(text).map(ObservationValue::Integer),
        DataKind::Position => decode_position(text).map(ObservationValue::Position),
        DataKind::String => Ok(ObservationValue::String(text.to_string())),
        DataKind::Statistics => decode_statistics(text).map(ObservationValue::Statistics),
        DataKind::Unknown | DataKind::Binary => Err(DataError::UnsupportedKind(kind)),
    }
}

/// Decode boolean text: `true`/`false` in any case, or `1`/`0`.
pub fn decode_bool(text: &str) -> Result<bool, DataError> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") || t == "1" {
        Ok(true)
    } else if t.eq_ignore_ascii_case("false") || t == "0" {
        Ok(false)
    } else {
        Err(DataError::malformed(
            DataKind::Boolean,
            format!("'{t}' is not a boolean"),
        ))
    }
}

/// Decode double text.
pub fn decode_double(text: &str) -> Result<f64, DataError> {
    parse_f64(DataKind::Double, text)
}

/// Decode decimal `i32` text.
pub fn decode_integer(text: &str) -> Result<i32, DataError> {
    text.trim()
        .parse::<i32>()
        .map_err(|e| DataError::malformed(DataKind::Integer, e.to_string()))
}

fn parse_f64(kind: DataKind, text: &str) -> Result<f64, DataError> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| DataError::malformed(kind, format!("'{}': {e}", text.trim())))
}

fn decode_position(text: &str) -> Result<Position, DataError> {
    let kind = DataKind::Position;
    let parts: Vec<&str> = text.split(',').collect();
    match parts.as_slice() {
        [lat, lon] => Ok(Position {
            latitude: parse_f64(kind, lat)?,
            longitude: parse_f64(kind, lon)?,
            altitude: None,
        }),
        [lat, lon, alt] => Ok(Position {
            latitude: parse_f64(kind, lat)?,
            longitude: parse_f64(kind, lon)?,
            altitude: Some(parse_f64(kind, alt)?),
        }),
        _ => Err(DataError::malformed(
            kind,
            format!("expected 2 or 3 fields, got {}", parts.len()),
        )),
    }
}

fn decode_statistics(text: &str) -> Result<DescriptiveStatistics, DataError> {
    let kind = DataKind::Statistics;
    let parts: Vec<&str> = text.split(',').collect();
    let [from, to, count, min, max, mean, median, std_dev] = parts.as_slice() else {
        return Err(DataError::malformed(
            kind,
            format!("expected 8 fields, got {}", parts.len()),
        ));
    };

    Ok(DescriptiveStatistics {
        from: parse_instant(from)?,
        to: parse_instant(to)?,
        count: count
            .trim()
            .parse()
            .map_err(|e| DataError::malformed(kind, format!("count: {e}")))?,
        minimum: parse_f64(kind, min)?,
        maximum: parse_f64(kind, max)?,
        mean: parse_f64(kind, mean)?,
        median: parse_f64(kind, median)?,
        std_dev: parse_f64(kind, std_dev)?,
    })
}

fn parse_instant(text: &str) -> Result<DateTime<Utc>, DataError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DataError::malformed(DataKind::Statistics, format!("'{text}': {e}")))
}
