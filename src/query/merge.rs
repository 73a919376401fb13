//! History merge engine
//!
//! Each requested key is fetched independently, ascending by timestamp. The
//! per-key series are then merged with one cursor per key: every step emits a
//! row at the smallest pending timestamp, filled by every cursor sitting on
//! exactly that timestamp and null for the rest.
//!
//! ```text
//!   temp:  10 ─── 20 ─────────── 40
//!   mode:  10 ────────── 30
//!
//!   row    10     20     30      40
//!   temp   21.5   21.7   null    22.0
//!   mode   "eco"  null   "boost" null
//! ```

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::read_value;
use crate::error::QueryError;
use crate::storage::{SeriesQuery, SortOrder, TimeBounds, TsStore};
use crate::types::{format_systime, TimeRange, Value};

/// Key name reserved for the timestamp column of the merged output
pub const SYSTIME_KEY: &str = "systime";

/// One observation of a single key: timestamp plus decoded value
pub type SeriesPoint = (DateTime<Utc>, Option<Value>);

/// One aligned output row
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    /// Row timestamp
    pub timestamp: DateTime<Utc>,
    /// One entry per key, `None` when that key has no value at this instant
    pub values: Vec<Option<Value>>,
}

/// Merge result for a device
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedHistory {
    /// Keys in output order, after normalization
    pub keys: Vec<String>,
    /// Aligned rows, ascending by timestamp
    pub rows: Vec<MergedRow>,
}

impl MergedHistory {
    /// Column-oriented JSON: `"systime"` plus one index-aligned array per key
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert(
            SYSTIME_KEY.to_string(),
            Json::Array(
                self.rows
                    .iter()
                    .map(|row| Json::String(format_systime(&row.timestamp)))
                    .collect(),
            ),
        );
        for (i, key) in self.keys.iter().enumerate() {
            let column = self
                .rows
                .iter()
                .map(|row| {
                    row.values
                        .get(i)
                        .and_then(|v| v.as_ref())
                        .map(Value::to_json)
                        .unwrap_or(Json::Null)
                })
                .collect();
            out.insert(key.clone(), Json::Array(column));
        }
        Json::Object(out)
    }
}

/// Drop empty and reserved key names and keep only the first occurrence of each
pub fn normalize_keys(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if key.is_empty() || key == SYSTIME_KEY {
            continue;
        }
        if seen.insert(key.as_str()) {
            out.push(key.clone());
        }
    }
    out
}

/// k-way merge of ascending per-key series
///
/// Ties are exact timestamp equality. The output has one row per distinct
/// timestamp across all series, and every row has `series.len()` values.
pub fn merge_series(series: &[Vec<SeriesPoint>]) -> Vec<MergedRow> {
    let mut cursors = vec![0usize; series.len()];
    let mut rows = Vec::new();

    loop {
        let tmin = series
            .iter()
            .zip(&cursors)
            .filter_map(|(points, &at)| points.get(at).map(|(ts, _)| *ts))
            .min();
        let Some(tmin) = tmin else {
            break;
        };

        let values = series
            .iter()
            .zip(cursors.iter_mut())
            .map(|(points, at)| match points.get(*at) {
                Some((ts, value)) if *ts == tmin => {
                    *at += 1;
                    value.clone()
                },
                _ => None,
            })
            .collect();

        rows.push(MergedRow {
            timestamp: tmin,
            values,
        });
    }

    rows
}

/// Fetches per-key series and merges them into aligned rows
#[derive(Clone)]
pub struct HistoryMerger {
    store: Arc<dyn TsStore>,
}

impl HistoryMerger {
    /// Create a merger reading from `store`
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self { store }
    }

    /// Merge the history of `keys` for one device over an inclusive range
    ///
    /// A key whose fetch fails is logged and contributes only nulls; the
    /// other keys are still returned.
    pub async fn merge(
        &self,
        device_id: &str,
        keys: &[String],
        range: TimeRange,
    ) -> Result<MergedHistory, QueryError> {
        let keys = normalize_keys(keys);
        let bounds = TimeBounds::inclusive(range.start_time(), range.end_time());

        let fetches = keys.iter().map(|key| self.fetch(device_id, key, bounds));
        let series: Vec<Vec<SeriesPoint>> = join_all(fetches).await;

        let rows = merge_series(&series);
        debug!(
            device_id,
            keys = keys.len(),
            rows = rows.len(),
            "Merged device history"
        );
        Ok(MergedHistory { keys, rows })
    }

    async fn fetch(&self, device_id: &str, key: &str, bounds: TimeBounds) -> Vec<SeriesPoint> {
        let query = SeriesQuery::new(device_id, key, bounds, SortOrder::Ascending);
        match self.store.query_series(&query).await {
            Ok(rows) => rows.iter().map(|row| (row.ts, read_value(row))).collect(),
            Err(e) => {
                warn!(device_id, key, error = %e, "History fetch failed, key left empty");
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ms_to_datetime;

    fn point(ts: i64, value: Value) -> SeriesPoint {
        (ms_to_datetime(ts), Some(value))
    }

    #[test]
    fn test_equal_timestamps_share_a_row() {
        let a = vec![point(10, Value::String("x".to_string()))];
        let b = vec![point(10, Value::Number(5.0))];
        let rows = merge_series(&[a, b]);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].values,
            vec![
                Some(Value::String("x".to_string())),
                Some(Value::Number(5.0))
            ]
        );
    }

    #[test]
    fn test_distinct_timestamps_get_nulls() {
        let a = vec![point(10, Value::String("x".to_string()))];
        let b = vec![point(20, Value::Number(5.0))];
        let rows = merge_series(&[a, b]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, ms_to_datetime(10));
        assert_eq!(rows[0].values[1], None);
        assert_eq!(rows[1].values[0], None);
        assert_eq!(rows[1].values[1], Some(Value::Number(5.0)));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge_series(&[]).is_empty());
        assert!(merge_series(&[vec![], vec![]]).is_empty());
    }

    #[test]
    fn test_normalize_keys() {
        let keys: Vec<String> = ["temp", "", "systime", "mode", "temp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(normalize_keys(&keys), vec!["temp", "mode"]);
    }

    #[test]
    fn test_to_json_shape() {
        let history = MergedHistory {
            keys: vec!["a".to_string(), "b".to_string()],
            rows: merge_series(&[
                vec![point(0, Value::Bool(true))],
                vec![point(1_000, Value::Number(2.5))],
            ]),
        };
        let json = history.to_json();
        assert_eq!(
            json,
            serde_json::json!({
                "systime": ["1970-01-01 00:00:00", "1970-01-01 00:00:01"],
                "a": [true, null],
                "b": [null, 2.5],
            })
        );
    }
}
