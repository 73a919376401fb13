//! Raw plot series for one key

use serde::Serialize;
use std::sync::Arc;

use super::read_value;
use crate::error::QueryError;
use crate::storage::{SeriesQuery, SortOrder, TimeBounds, TsStore};
use crate::types::{TimeRange, Value};

/// One plot point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPoint {
    /// Timestamp (ms)
    pub x: i64,
    /// Decoded value, `null` when every column holds its sentinel
    pub y: Option<Value>,
}

/// Reads ascending raw points
#[derive(Clone)]
pub struct RawSeries {
    store: Arc<dyn TsStore>,
}

impl RawSeries {
    /// Create a reader over `store`
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self { store }
    }

    /// Every point of `key` inside the inclusive range, oldest first
    pub async fn points(
        &self,
        device_id: &str,
        key: &str,
        range: TimeRange,
    ) -> Result<Vec<PlotPoint>, QueryError> {
        let query = SeriesQuery::new(
            device_id,
            key,
            TimeBounds::inclusive(range.start_time(), range.end_time()),
            SortOrder::Ascending,
        );
        let rows = self.store.query_series(&query).await?;
        Ok(rows
            .iter()
            .map(|row| PlotPoint {
                x: row.ts_millis(),
                y: read_value(row),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStore, StoredRow, NUMBER_DEFAULT};
    use crate::types::ms_to_datetime;

    #[tokio::test]
    async fn test_points_are_ascending_with_nulls() {
        let store = Arc::new(InMemoryStore::new());
        store.seed(
            "ts_kv_d",
            [
                StoredRow::from_value(ms_to_datetime(30), "d", "k", &Value::Number(3.0)),
                StoredRow::from_value(ms_to_datetime(10), "d", "k", &Value::Number(1.0)),
                StoredRow::from_value(ms_to_datetime(20), "d", "k", &Value::Number(NUMBER_DEFAULT)),
                StoredRow::from_value(ms_to_datetime(99), "d", "k", &Value::Number(9.0)),
            ],
        );
        let series = RawSeries::new(store);
        let points = series
            .points("d", "k", TimeRange::new(10, 30).unwrap())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&points).unwrap(),
            serde_json::json!([
                {"x": 10, "y": 1.0},
                {"x": 20, "y": null},
                {"x": 30, "y": 3.0},
            ])
        );
    }
}
