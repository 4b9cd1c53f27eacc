//! Buffered telemetry events and their parameters.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scalar event parameter.
///
/// Serialized untagged, so parameters read as plain JSON scalars both in the
/// pending queue and at the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Whole number
    Int(i64),
    /// Decimal number
    Float(f64),
    /// Free text
    Text(String),
}

impl ParamValue {
    /// Returns `false` for NaN and infinite floats, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            ParamValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Event parameters, ordered by key.
pub type EventParams = BTreeMap<String, ParamValue>;

/// Builds [`EventParams`] from `(key, value)` pairs.
///
/// # Examples
///
/// ```
/// use consent_core::{params, ParamValue};
///
/// let p = params([("event_category", ParamValue::from("engagement")), ("value", 3.into())]);
/// assert_eq!(p.len(), 2);
/// ```
pub fn params<K, I>(pairs: I) -> EventParams
where
    K: Into<String>,
    I: IntoIterator<Item = (K, ParamValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// An event accepted into the batch buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedEvent {
    /// Event name, also the deduplication key
    pub name: String,
    /// Caller-supplied parameters
    pub params: EventParams,
    /// When the event was accepted
    pub enqueued_at: DateTime<Utc>,
    /// Position in the session, starting at 0
    pub sequence: u64,
}

/// A buffered event parked in storage while the sink was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PendingEvent {
    pub(crate) event: BufferedEvent,
    pub(crate) stored_at: DateTime<Utc>,
}
