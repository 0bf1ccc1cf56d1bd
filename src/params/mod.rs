//! Typed extraction of tool parameters from an untyped argument map.
//!
//! Every accessor takes `(args, key, required, default)`:
//!
//! * a missing key fails with [`ToolError::MissingRequired`] when required and
//!   yields `default` otherwise
//! * `null` or `""` fails with [`ToolError::NullOrEmpty`] when required and
//!   yields `default` otherwise
//! * a value of the wrong shape fails with [`ToolError::TypeMismatch`]

use crate::error::ToolError;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

mod time;

pub use time::{parse_time, TimeRange};

/// Untyped tool arguments as delivered by the transport.
pub type Arguments = Map<String, Value>;

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolve a key to its value, applying the missing/null/empty rules.
///
/// `Ok(None)` means the caller should fall back to its default.
fn lookup<'a>(args: &'a Arguments, key: &str, required: bool) -> Result<Option<&'a Value>, ToolError> {
    match args.get(key) {
        None if required => Err(ToolError::MissingRequired(key.to_string())),
        None => Ok(None),
        Some(Value::Null) => empty(key, required),
        Some(Value::String(s)) if s.is_empty() => empty(key, required),
        Some(value) => Ok(Some(value)),
    }
}

fn empty<'a>(key: &str, required: bool) -> Result<Option<&'a Value>, ToolError> {
    if required {
        Err(ToolError::NullOrEmpty(key.to_string()))
    } else {
        Ok(None)
    }
}

pub fn string(args: &Arguments, key: &str, required: bool, default: &str) -> Result<String, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "string")),
    }
}

/// Integers, unsigned integers and floats are accepted; floats truncate
/// toward zero.
pub fn int(args: &Arguments, key: &str, required: bool, default: i64) -> Result<i64, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                Ok(v)
            } else if let Some(v) = n.as_u64() {
                i64::try_from(v).map_err(|_| ToolError::type_mismatch(key, "uint64", "int64"))
            } else if let Some(v) = n.as_f64() {
                Ok(v.trunc() as i64)
            } else {
                Err(ToolError::type_mismatch(key, "number", "integer"))
            }
        }
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "integer")),
    }
}

pub fn float(args: &Arguments, key: &str, required: bool, default: f64) -> Result<f64, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ToolError::type_mismatch(key, "number", "float")),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "float")),
    }
}

pub fn boolean(args: &Arguments, key: &str, required: bool, default: bool) -> Result<bool, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "boolean")),
    }
}

/// Strings go through [`parse_time`]; numbers are seconds since the epoch.
pub fn time(
    args: &Arguments,
    key: &str,
    required: bool,
    default: DateTime<Utc>,
) -> Result<DateTime<Utc>, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(Value::String(s)) => parse_time(s, Utc::now())
            .ok_or_else(|| ToolError::type_mismatch(key, format!("string {s:?}"), "time")),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| ToolError::type_mismatch(key, "number", "time")),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "time")),
    }
}

pub fn string_array(
    args: &Arguments,
    key: &str,
    required: bool,
    default: &[String],
) -> Result<Vec<String>, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default.to_vec()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ToolError::type_mismatch(
                    key,
                    format!("array containing {}", type_name(other)),
                    "array of strings",
                )),
            })
            .collect(),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "array of strings")),
    }
}

/// Decode an object parameter into `T` through a JSON round trip.
pub fn object<T: DeserializeOwned>(
    args: &Arguments,
    key: &str,
    required: bool,
    default: T,
) -> Result<T, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|e| ToolError::type_mismatch(key, format!("object ({e})"), std::any::type_name::<T>())),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "object")),
    }
}

pub fn object_array<T: DeserializeOwned>(
    args: &Arguments,
    key: &str,
    required: bool,
    default: Vec<T>,
) -> Result<Vec<T>, ToolError> {
    match lookup(args, key, required)? {
        None => Ok(default),
        Some(value @ Value::Array(_)) => serde_json::from_value(value.clone()).map_err(|e| {
            ToolError::type_mismatch(key, format!("array ({e})"), std::any::type_name::<Vec<T>>())
        }),
        Some(other) => Err(ToolError::type_mismatch(key, type_name(other), "array of objects")),
    }
}

/// Reads `end` (default now) and then `start` (default one hour before end).
pub fn time_range(args: &Arguments) -> Result<TimeRange, ToolError> {
    let end = time(args, "end", false, Utc::now())?;
    let start = time(args, "start", false, end - Duration::hours(1))?;
    Ok(TimeRange { start, end })
}

/// Reads non-negative `limit` and `offset` for in-memory windowing.
pub fn limit_offset(args: &Arguments, default_limit: usize) -> Result<(usize, usize), ToolError> {
    let limit = int(args, "limit", false, default_limit as i64)?;
    let offset = int(args, "offset", false, 0)?;
    if limit < 0 || offset < 0 {
        return Err(ToolError::invalid("limit and offset must be non-negative"));
    }
    Ok((limit as usize, offset as usize))
}
