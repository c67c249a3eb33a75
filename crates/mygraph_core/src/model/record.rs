//! Backend document shape and field codec helpers.
//!
//! # Responsibility
//! - Define the document representation exchanged with backends.
//! - Convert between `chrono` timestamps and the backend timestamp type.
//! - Read single fields through serde, reporting missing or invalid ones by name.
//!
//! # Invariants
//! - Timestamp conversion is lossless at nanosecond precision.
//! - Field readers never coerce a value of the wrong JSON type.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One stored document: a JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Timestamp representation used by document backends.
///
/// Serialized as `{ "seconds": i64, "nanoseconds": u32 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendTimestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl BackendTimestamp {
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos(),
        }
    }

    /// Returns `None` when the pair is outside the representable range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds).single()
    }

    pub fn to_value(self) -> Value {
        json!(self)
    }
}

/// Decode error for one stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A mandatory field is absent (or `null`).
    MissingField(&'static str),
    /// A field is present but cannot be decoded.
    InvalidField {
        field: &'static str,
        message: String,
    },
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing mandatory field `{field}`"),
            Self::InvalidField { field, message } => {
                write!(f, "invalid field `{field}`: {message}")
            }
        }
    }
}

impl Error for RecordError {}

pub type RecordResult<T> = Result<T, RecordError>;

fn present<'a>(record: &'a Record, field: &'static str) -> Option<&'a Value> {
    record.get(field).filter(|value| !value.is_null())
}

/// Reads an optional field through its `Deserialize` impl.
///
/// Absent and `null` fields read as `None`; a present value of the wrong
/// shape (including an unknown enum variant) is `InvalidField`.
pub fn optional<T: DeserializeOwned>(record: &Record, field: &'static str) -> RecordResult<Option<T>> {
    let Some(value) = present(record, field) else {
        return Ok(None);
    };
    T::deserialize(value)
        .map(Some)
        .map_err(|err| RecordError::InvalidField {
            field,
            message: err.to_string(),
        })
}

pub fn required<T: DeserializeOwned>(record: &Record, field: &'static str) -> RecordResult<T> {
    optional(record, field)?.ok_or(RecordError::MissingField(field))
}

/// Reads an optional integer field; integral floats such as `3.0` are accepted.
pub fn opt_integer(record: &Record, field: &'static str) -> RecordResult<Option<i64>> {
    let Some(number) = optional::<Number>(record, field)? else {
        return Ok(None);
    };
    if let Some(value) = number.as_i64() {
        return Ok(Some(value));
    }
    match number.as_f64() {
        Some(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
            Ok(Some(value as i64))
        }
        _ => Err(RecordError::InvalidField {
            field,
            message: format!("expected integer, got {number}"),
        }),
    }
}

pub fn opt_timestamp(
    record: &Record,
    field: &'static str,
) -> RecordResult<Option<DateTime<Utc>>> {
    let Some(timestamp) = optional::<BackendTimestamp>(record, field)? else {
        return Ok(None);
    };
    timestamp
        .to_datetime()
        .map(Some)
        .ok_or_else(|| RecordError::InvalidField {
            field,
            message: format!(
                "timestamp out of range: seconds={} nanoseconds={}",
                timestamp.seconds, timestamp.nanoseconds
            ),
        })
}

pub fn req_timestamp(record: &Record, field: &'static str) -> RecordResult<DateTime<Utc>> {
    opt_timestamp(record, field)?.ok_or(RecordError::MissingField(field))
}
