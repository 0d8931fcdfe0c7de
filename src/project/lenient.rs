//! Tolerant field readers for descriptor JSON.
//!
//! Used with `#[serde(default, deserialize_with = ...)]`: a field that is
//! present but malformed is read as absent instead of failing the document.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::InspectionState;

pub(crate) fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(string(d)?.unwrap_or_default())
}

pub(crate) fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn path<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
    Ok(string(d)?.filter(|s| !s.is_empty()).map(PathBuf::from))
}

pub(crate) fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

pub(crate) fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(as_u64(&Value::deserialize(d)?))
}

pub(crate) fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(number(d)?.unwrap_or(0))
}

pub(crate) fn uuid_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Uuid>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Missing or malformed identities get a fresh one so loaded projects stay distinct.
pub(crate) fn identity<'de, D: Deserializer<'de>>(d: D) -> Result<Uuid, D::Error> {
    let value = Value::deserialize(d)?;
    match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
        Some(id) => Ok(id),
        None => {
            let id = Uuid::new_v4();
            warn!("descriptor: malformed project id {} replaced by {}", value, id);
            Ok(id)
        }
    }
}

pub(crate) fn timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(string(d)?.and_then(|s| parse_timestamp(&s)))
}

pub(crate) fn object<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

pub(crate) fn state<'de, D: Deserializer<'de>>(d: D) -> Result<InspectionState, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => InspectionState::from(s),
        _ => InspectionState::default(),
    })
}

/// Payloads may be stored as an object or as a JSON string holding one.
pub(crate) fn payload<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    })
}

/// Elements that fail to deserialize are dropped with a warning.
pub(crate) fn seq<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Value::deserialize(d)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("descriptor: skipping malformed element #{}: {}", i, e);
                None
            }
        })
        .collect())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
