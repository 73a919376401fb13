//! Core data types shared by ingestion and queries
//!
//! # Key Types
//!
//! - **`Value`**: the closed set of scalar types a device attribute can carry
//! - **`Sample`**: one decoded device/key/timestamp/value observation
//! - **`TimeRange`**: an inclusive millisecond window used by every query
//!
//! # Example
//!
//! ```rust
//! use tskv_gateway::types::{Sample, TimeRange, Value};
//!
//! let sample = Sample::now("sensor-001", "temperature", Value::Number(21.5));
//! assert_eq!(sample.value.type_name(), "number");
//!
//! let range = TimeRange::new(1_000, 2_000).unwrap();
//! assert!(range.contains_ms(1_500));
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueryError, ValueError};

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// A typed scalar attribute value
///
/// Device payloads are JSON, but only strings, numbers and booleans are
/// persisted. Everything else is rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Text value, stored in `string_v`
    String(String),
    /// Numeric value, stored in `number_v`
    Number(f64),
    /// Boolean value, stored in `bool_v` as 0/1
    Bool(bool),
}

impl Value {
    /// Convert a raw JSON value into a typed scalar
    ///
    /// # Errors
    ///
    /// Returns `ValueError::UnsupportedType` for null, arrays, objects and
    /// numbers that cannot be represented as `f64`.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, ValueError> {
        match raw {
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| ValueError::UnsupportedType(format!("number {}", n))),
            serde_json::Value::Null => Err(ValueError::UnsupportedType("null".to_string())),
            serde_json::Value::Array(_) => Err(ValueError::UnsupportedType("array".to_string())),
            serde_json::Value::Object(_) => {
                Err(ValueError::UnsupportedType("object".to_string()))
            },
        }
    }

    /// JSON representation used in query replies
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Short type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One decoded observation
///
/// Produced by the bus intake and consumed by exactly one ingestion worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Device identifier; an empty id marks a sample that must be discarded
    pub device_id: String,
    /// Attribute name
    pub key: String,
    /// Observation instant
    pub timestamp: DateTime<Utc>,
    /// Typed value
    pub value: Value,
    /// Owning tenant, when the payload carried one
    pub tenant_id: Option<String>,
}

impl Sample {
    /// Create a sample
    pub fn new(
        device_id: impl Into<String>,
        key: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            key: key.into(),
            timestamp,
            value,
            tenant_id: None,
        }
    }

    /// Create a sample stamped with the current wall-clock time
    pub fn now(device_id: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self::new(device_id, key, Utc::now(), value)
    }

    /// Attach a tenant id
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Inclusive time window in Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidTimeRange` if `start > end`, or
    /// `QueryError::TimestampOutOfRange` if either end is not a representable
    /// instant.
    pub fn new(start: i64, end: i64) -> Result<Self, QueryError> {
        if start > end {
            return Err(QueryError::InvalidTimeRange { start, end });
        }
        for ms in [start, end] {
            if checked_ms_to_datetime(ms).is_none() {
                return Err(QueryError::TimestampOutOfRange(ms));
            }
        }
        Ok(Self { start, end })
    }

    /// Duration in milliseconds, saturating at `i64::MAX`
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the timestamp falls inside the range
    pub fn contains_ms(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Pull `start` forward so the range spans at most `max_days`
    ///
    /// The end of the range is preserved; only the oldest part is cut.
    pub fn clamp_to_days(self, max_days: i64) -> Self {
        let max_span = max_days.saturating_mul(MS_PER_DAY);
        if self.duration_ms() > max_span {
            Self {
                start: self.end.saturating_sub(max_span),
                end: self.end,
            }
        } else {
            self
        }
    }

    /// Range start as a UTC instant
    pub fn start_time(&self) -> DateTime<Utc> {
        ms_to_datetime(self.start)
    }

    /// Range end as a UTC instant
    pub fn end_time(&self) -> DateTime<Utc> {
        ms_to_datetime(self.end)
    }
}

/// Convert Unix milliseconds to a UTC instant, `None` outside chrono's range
pub fn checked_ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Convert Unix milliseconds to a UTC instant, falling back to the epoch
///
/// Request timestamps go through [`TimeRange::new`] first, which rejects
/// values this would silently replace.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    checked_ms_to_datetime(ms).unwrap_or_default()
}

/// Format an instant the way history replies show it (`2006-01-02 15:04:05`)
pub fn format_systime(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from_json_scalars() {
        assert_eq!(
            Value::from_json(&json!("on")).unwrap(),
            Value::String("on".to_string())
        );
        assert_eq!(Value::from_json(&json!(5)).unwrap(), Value::Number(5.0));
        assert_eq!(Value::from_json(&json!(true)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_value_from_json_rejects_composites() {
        assert!(matches!(
            Value::from_json(&json!(null)),
            Err(ValueError::UnsupportedType(_))
        ));
        assert!(Value::from_json(&json!([1, 2])).is_err());
        assert!(Value::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_time_range_rejects_inverted() {
        assert!(TimeRange::new(10, 5).is_err());
        assert!(TimeRange::new(5, 5).is_ok());
    }

    #[test]
    fn test_clamp_to_days() {
        let end = 1_700_000_000_000;
        let range = TimeRange::new(end - 200 * MS_PER_DAY, end).unwrap();
        let clamped = range.clamp_to_days(100);
        assert_eq!(clamped.end, end);
        assert_eq!(clamped.duration_ms(), 100 * MS_PER_DAY);

        let short = TimeRange::new(end - MS_PER_DAY, end).unwrap();
        assert_eq!(short.clamp_to_days(100), short);
    }

    #[test]
    fn test_time_range_rejects_unrepresentable_instants() {
        assert!(matches!(
            TimeRange::new(0, i64::MAX),
            Err(QueryError::TimestampOutOfRange(i64::MAX))
        ));
        assert!(matches!(
            TimeRange::new(i64::MIN, 0),
            Err(QueryError::TimestampOutOfRange(i64::MIN))
        ));
    }

    #[test]
    fn test_extreme_ranges_do_not_overflow() {
        let wide = TimeRange {
            start: i64::MIN,
            end: i64::MAX,
        };
        assert_eq!(wide.duration_ms(), i64::MAX);
        let clamped = wide.clamp_to_days(100);
        assert_eq!(clamped.end, i64::MAX);
        assert_eq!(clamped.start, i64::MAX - 100 * MS_PER_DAY);

        let open = TimeRange { start: 0, end: 10 };
        assert_eq!(open.clamp_to_days(i64::MAX), open);
    }

    #[test]
    fn test_format_systime() {
        let ts = ms_to_datetime(0);
        assert_eq!(format_systime(&ts), "1970-01-01 00:00:00");
    }
}
