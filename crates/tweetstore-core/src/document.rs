use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use polars::prelude::{AnyValue, DataFrame, TimeUnit};
use serde::Serialize;
use serde_json::Value;

use crate::cleaning::CleanedFrame;
use crate::error::Result;

/// Seconds since the Unix epoch of 1981-12-02T00:00:00Z.
pub const SENTINEL_EPOCH_SECONDS: i64 = 376_099_200;

/// Stand-in for missing or unparseable timestamps. The store cannot hold a null
/// datetime, and no post in the dataset can predate this instant.
pub static SENTINEL_INSTANT: Lazy<DateTime<Utc>> = Lazy::new(|| {
    Utc.timestamp_opt(SENTINEL_EPOCH_SECONDS, 0)
        .single()
        .unwrap_or_default()
});

/// A stored record: field name to value. Missing cells are absent, not `Null`.
pub type Document = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Sort bucket across types: null, numbers, text, booleans, timestamps.
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Int(_) | FieldValue::Float(_) => 1,
            FieldValue::Text(_) => 2,
            FieldValue::Bool(_) => 3,
            FieldValue::Timestamp(_) => 4,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            FieldValue::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a JSON value read back from a store. Timestamps come back as text.
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(flag) => FieldValue::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => FieldValue::Int(int),
                None => number
                    .as_f64()
                    .map(FieldValue::Float)
                    .unwrap_or(FieldValue::Null),
            },
            Value::String(text) => FieldValue::Text(text.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.type_rank().cmp(&b.type_rank()),
            },
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Timestamp(value) => {
                f.write_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// Converts a cleaned frame into one document per row.
///
/// Null cells are left out of the document, except in the designated timestamp
/// columns where they become [`SENTINEL_INSTANT`].
pub fn frame_to_documents(cleaned: &CleanedFrame) -> Result<Vec<Document>> {
    let df: &DataFrame = &cleaned.df;
    let height = df.height();
    let mut documents = vec![Document::new(); height];

    for column in df.get_columns() {
        let name = column.name().to_string();
        let is_timestamp = cleaned.timestamp_columns.iter().any(|ts| *ts == name);
        let series = column.as_materialized_series();

        for (idx, document) in documents.iter_mut().enumerate() {
            match any_value_to_field(series.get(idx)?) {
                Some(value) => {
                    document.insert(name.clone(), value);
                }
                None if is_timestamp => {
                    document.insert(name.clone(), FieldValue::Timestamp(*SENTINEL_INSTANT));
                }
                None => {}
            }
        }
    }

    Ok(documents)
}

fn any_value_to_field(value: AnyValue<'_>) -> Option<FieldValue> {
    let field = match value {
        AnyValue::Null => return None,
        AnyValue::Boolean(flag) => FieldValue::Bool(flag),
        AnyValue::Int32(v) => FieldValue::Int(v.into()),
        AnyValue::Int64(v) => FieldValue::Int(v),
        AnyValue::UInt32(v) => FieldValue::Int(v.into()),
        AnyValue::UInt64(v) => match i64::try_from(v) {
            Ok(int) => FieldValue::Int(int),
            Err(_) => FieldValue::Float(v as f64),
        },
        AnyValue::Float32(v) => FieldValue::Float(v.into()),
        AnyValue::Float64(v) => FieldValue::Float(v),
        AnyValue::String(text) => FieldValue::Text(text.to_string()),
        AnyValue::StringOwned(text) => FieldValue::Text(text.to_string()),
        AnyValue::Datetime(raw, unit, _) => return datetime_from_raw(raw, unit),
        other => FieldValue::Text(other.to_string()),
    };
    Some(field)
}

fn datetime_from_raw(raw: i64, unit: TimeUnit) -> Option<FieldValue> {
    let instant = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(raw)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(raw),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(raw),
    };
    instant.map(FieldValue::Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_second_of_december_1981() {
        let expected = Utc.with_ymd_and_hms(1981, 12, 2, 0, 0, 0).unwrap();
        assert_eq!(*SENTINEL_INSTANT, expected);
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert_eq!(FieldValue::Int(3), FieldValue::Float(3.0));
        assert!(FieldValue::Int(2) < FieldValue::Float(2.5));
        assert!(FieldValue::Null < FieldValue::Int(-10));
        assert!(FieldValue::Int(99) < FieldValue::Text("a".into()));
    }

    #[test]
    fn timestamps_serialize_as_rfc3339() {
        let value = FieldValue::Timestamp(*SENTINEL_INSTANT);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!("1981-12-02T00:00:00Z"));
    }

    #[test]
    fn json_numbers_keep_integer_shape() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(4)),
            FieldValue::Int(4)
        );
        assert!(matches!(
            FieldValue::from_json(&serde_json::json!(9.25)),
            FieldValue::Float(v) if (v - 9.25).abs() < f64::EPSILON
        ));
    }
}
