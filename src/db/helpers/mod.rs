use std::convert::TryFrom;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use serde_json::{Number, Value};
use thiserror::Error;

/// A source cell that cannot be represented or interpreted, as opposed to a
/// query that failed to run.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MalformedRow(pub String);

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Canonical text form for stored timestamps. Fixed precision keeps lexical
/// order equal to time order, which `MAX(..)` over the column relies on.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// Timestamps as the source exports write them: RFC 3339, short offsets such
/// as `+00`, naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` (read as UTC), or epoch
/// seconds as a number or numeric text.
pub fn parse_source_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<f64>() {
                return epoch_seconds(secs);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
                if let Ok(dt) = DateTime::parse_from_str(s, format) {
                    return Some(dt.with_timezone(&Utc));
                }
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            None
        }
        Value::Number(n) => epoch_seconds(n.as_f64()?),
        _ => None,
    }
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    let micros = secs * 1_000_000.0;
    if !micros.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros(micros.round() as i64)
}

/// Converts one SQLite cell into a JSON value for schema-agnostic rows.
pub fn sql_value_to_json(value: ValueRef<'_>, column: &str) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(Number::from(i)),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => {
                return Err(MalformedRow(format!("column {column} holds invalid UTF-8")).into())
            }
        },
        ValueRef::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => {
                return Err(MalformedRow(format!("column {column} holds a binary blob")).into())
            }
        },
    })
}

/// Quotes a table or column name taken from configuration.
pub fn quote_identifier(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !valid {
        bail!("invalid SQL identifier '{name}'");
    }
    Ok(format!("\"{name}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(5);
        let c = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(format_datetime(&a) < format_datetime(&b));
        assert!(format_datetime(&b) < format_datetime(&c));
        assert_eq!(parse_datetime(&format_datetime(&b), "ts").unwrap(), b);
    }

    #[test]
    fn identifiers_are_validated() {
        assert_eq!(quote_identifier("createdAt").unwrap(), "\"createdAt\"");
        assert!(quote_identifier("events; DROP TABLE x").is_err());
        assert!(quote_identifier("").is_err());
    }

    #[test]
    fn timestamps_parse_in_every_source_format() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 1, 6, 30, 0).unwrap();
        for raw in [
            Value::from("2026-02-01T06:30:00Z"),
            Value::from("2026-02-01T08:30:00+02:00"),
            Value::from("2026-02-01 06:30:00"),
            Value::from("2026-02-01 06:30:00.000+00"),
            Value::from("2026-02-01T06:30:00.000000"),
            Value::from(expected.timestamp()),
            Value::from(expected.timestamp().to_string()),
        ] {
            assert_eq!(parse_source_timestamp(&raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_source_timestamp(&Value::from("yesterday")), None);
        assert_eq!(parse_source_timestamp(&Value::from("NaN")), None);
        assert_eq!(parse_source_timestamp(&Value::Null), None);
    }

    #[test]
    fn sql_values_map_to_json() {
        assert_eq!(sql_value_to_json(ValueRef::Integer(7), "c").unwrap(), Value::from(7));
        assert_eq!(sql_value_to_json(ValueRef::Null, "c").unwrap(), Value::Null);
        assert_eq!(
            sql_value_to_json(ValueRef::Text(b"U1"), "c").unwrap(),
            Value::from("U1")
        );
        let blob = sql_value_to_json(ValueRef::Blob(&[0xff, 0xfe]), "c").unwrap_err();
        assert!(blob.downcast_ref::<MalformedRow>().is_some());
    }
}
