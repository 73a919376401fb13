//! In-memory store
//!
//! A lightweight stand-in for TDengine used by tests and local development.
//! It evaluates scans and windowed aggregates directly over a vector of rows
//! and supports fault injection so failure paths can be exercised.
//!
//! # Warning
//!
//! Data is lost on restart. Not suitable for production use.

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::partition::PartitionTags;
use super::row::{Column, StoredRow, TableRow};
use super::{AggregateQuery, SeriesQuery, SortOrder, TimeBounds, TsStore, WindowValue};
use crate::error::StoreError;

#[derive(Default)]
struct State {
    partitions: HashMap<String, PartitionTags>,
    rows: Vec<TableRow>,
}

/// In-memory [`TsStore`] implementation
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    /// Sizes of every successful `insert_rows` call, in call order
    insert_calls: RwLock<Vec<usize>>,
    failing_partitions: RwLock<HashSet<String>>,
    failing_keys: RwLock<HashSet<String>>,
    fail_inserts: AtomicBool,
    create_calls: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows bypassing partition checks (test fixtures)
    pub fn seed(&self, partition: &str, rows: impl IntoIterator<Item = StoredRow>) {
        let mut state = self.state.write();
        state
            .partitions
            .entry(partition.to_string())
            .or_insert_with(|| PartitionTags::for_device(partition));
        state.rows.extend(rows.into_iter().map(|row| TableRow {
            partition: partition.to_string(),
            row,
        }));
    }

    /// Make `create_partition` fail for this partition name
    pub fn fail_partition(&self, partition: &str) {
        self.failing_partitions.write().insert(partition.to_string());
    }

    /// Make scans and aggregates fail for this key
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Make every `insert_rows` call fail
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::Relaxed);
    }

    /// Number of partitions created
    pub fn partition_count(&self) -> usize {
        self.state.read().partitions.len()
    }

    /// Tags of a partition
    pub fn partition_tags(&self, partition: &str) -> Option<PartitionTags> {
        self.state.read().partitions.get(partition).cloned()
    }

    /// Number of `create_partition` calls, successful or not
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Every stored row, in insertion order
    pub fn rows(&self) -> Vec<TableRow> {
        self.state.read().rows.clone()
    }

    /// Sizes of successful bulk inserts, in call order
    pub fn insert_calls(&self) -> Vec<usize> {
        self.insert_calls.read().clone()
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_keys.read().contains(key) {
            return Err(StoreError::Backend(format!("injected failure for key {}", key)));
        }
        Ok(())
    }

    fn matching(&self, device_id: &str, key: &str, bounds: &TimeBounds) -> Vec<StoredRow> {
        self.state
            .read()
            .rows
            .iter()
            .filter(|r| r.row.device_id == device_id && r.row.k == key)
            .filter(|r| bounds.contains(&r.row.ts))
            .map(|r| r.row.clone())
            .collect()
    }
}

#[async_trait]
impl TsStore for InMemoryStore {
    fn store_id(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_partition(
        &self,
        partition: &str,
        tags: &PartitionTags,
    ) -> Result<(), StoreError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_partitions.read().contains(partition) {
            return Err(StoreError::Backend(format!(
                "injected failure creating {}",
                partition
            )));
        }
        self.state
            .write()
            .partitions
            .entry(partition.to_string())
            .or_insert_with(|| tags.clone());
        Ok(())
    }

    async fn insert_rows(&self, rows: &[TableRow]) -> Result<usize, StoreError> {
        if self.fail_inserts.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("injected insert failure".to_string()));
        }
        let mut state = self.state.write();
        if let Some(missing) = rows
            .iter()
            .find(|r| !state.partitions.contains_key(&r.partition))
        {
            return Err(StoreError::Rejected {
                code: 9826,
                desc: format!("Table does not exist: {}", missing.partition),
            });
        }
        state.rows.extend_from_slice(rows);
        self.insert_calls.write().push(rows.len());
        Ok(rows.len())
    }

    async fn query_series(&self, query: &SeriesQuery) -> Result<Vec<StoredRow>, StoreError> {
        self.check_key(&query.key)?;
        let mut rows = self.matching(&query.device_id, &query.key, &query.bounds);
        // stable sort keeps insertion order for equal timestamps
        match query.order {
            SortOrder::Ascending => rows.sort_by(|a, b| a.ts.cmp(&b.ts)),
            SortOrder::Descending => rows.sort_by(|a, b| b.ts.cmp(&a.ts)),
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count_series(
        &self,
        device_id: &str,
        key: &str,
        bounds: &TimeBounds,
    ) -> Result<u64, StoreError> {
        self.check_key(key)?;
        Ok(self.matching(device_id, key, bounds).len() as u64)
    }

    async fn aggregate_windows(
        &self,
        query: &AggregateQuery,
    ) -> Result<Vec<WindowValue>, StoreError> {
        self.check_key(&query.key)?;
        let function = AggregateFn::parse(&query.function)?;
        if query.window_ms <= 0 {
            return Err(StoreError::Backend(format!(
                "window must be positive, got {}",
                query.window_ms
            )));
        }

        let bounds = TimeBounds::inclusive(query.start, query.end);
        let mut rows = self.matching(&query.device_id, &query.key, &bounds);
        rows.sort_by(|a, b| a.ts.cmp(&b.ts));

        let start_ms = query.start.timestamp_millis();
        let mut windows: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for row in rows.iter().filter(|r| !r.is_default(Column::Number)) {
            let index = (row.ts_millis() - start_ms).div_euclid(query.window_ms);
            windows.entry(index).or_default().push(row.number_v);
        }

        Ok(windows
            .into_iter()
            .map(|(index, values)| WindowValue {
                window_start: query.start + Duration::milliseconds(index * query.window_ms),
                value: function.apply(&values),
            })
            .collect())
    }
}

/// Aggregate functions the in-memory store can evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateFn {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    First,
    Last,
    Spread,
}

impl AggregateFn {
    fn parse(name: &str) -> Result<Self, StoreError> {
        match name.to_ascii_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "spread" => Ok(Self::Spread),
            _ => Err(StoreError::UnsupportedAggregate(name.to_string())),
        }
    }

    fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let min = || values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = || values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => min(),
            Self::Max => max(),
            Self::Count => values.len() as f64,
            Self::First => values[0],
            Self::Last => values[values.len() - 1],
            Self::Spread => max() - min(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ms_to_datetime, Value};

    fn row(ts: i64, key: &str, value: Value) -> StoredRow {
        StoredRow::from_value(ms_to_datetime(ts), "dev-1", key, &value)
    }

    #[tokio::test]
    async fn test_insert_requires_partition() {
        let store = InMemoryStore::new();
        let rows = vec![TableRow {
            partition: "ts_kv_dev".to_string(),
            row: row(1, "a", Value::Number(1.0)),
        }];
        assert!(store.insert_rows(&rows).await.is_err());

        store
            .create_partition("ts_kv_dev", &PartitionTags::for_device("dev-1"))
            .await
            .unwrap();
        assert_eq!(store.insert_rows(&rows).await.unwrap(), 1);
        assert_eq!(store.insert_calls(), vec![1]);
    }

    #[tokio::test]
    async fn test_query_series_order_and_limit() {
        let store = InMemoryStore::new();
        store.seed(
            "ts_kv_dev",
            (1..=5).map(|i| row(i * 10, "a", Value::Number(i as f64))),
        );

        let bounds = TimeBounds::inclusive(ms_to_datetime(0), ms_to_datetime(100));
        let query = SeriesQuery::new("dev-1", "a", bounds, SortOrder::Descending).with_limit(2);
        let rows = store.query_series(&query).await.unwrap();
        let ts: Vec<i64> = rows.iter().map(|r| r.ts_millis()).collect();
        assert_eq!(ts, vec![50, 40]);

        assert_eq!(store.count_series("dev-1", "a", &bounds).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_aggregate_windows_skip_empty() {
        let store = InMemoryStore::new();
        store.seed(
            "ts_kv_dev",
            vec![
                row(1_000, "a", Value::Number(1.0)),
                row(1_500, "a", Value::Number(3.0)),
                // window [2000, 3000) is empty
                row(3_200, "a", Value::Number(10.0)),
                row(3_300, "a", Value::String("ignored".to_string())),
            ],
        );

        let query = AggregateQuery {
            device_id: "dev-1".to_string(),
            key: "a".to_string(),
            start: ms_to_datetime(1_000),
            end: ms_to_datetime(4_000),
            window_ms: 1_000,
            function: "AVG".to_string(),
        };
        let windows = store.aggregate_windows(&query).await.unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].window_start.timestamp_millis(), 1_000);
        assert_eq!(windows[0].value, Some(2.0));
        assert_eq!(windows[1].window_start.timestamp_millis(), 3_000);
        assert_eq!(windows[1].value, Some(10.0));
    }

    #[tokio::test]
    async fn test_unknown_aggregate_is_rejected() {
        let store = InMemoryStore::new();
        let query = AggregateQuery {
            device_id: "dev-1".to_string(),
            key: "a".to_string(),
            start: ms_to_datetime(0),
            end: ms_to_datetime(10),
            window_ms: 5,
            function: "percentile".to_string(),
        };
        assert!(matches!(
            store.aggregate_windows(&query).await,
            Err(StoreError::UnsupportedAggregate(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_key() {
        let store = InMemoryStore::new();
        store.fail_key("broken");
        let bounds = TimeBounds::inclusive(ms_to_datetime(0), ms_to_datetime(1));
        let query = SeriesQuery::new("dev-1", "broken", bounds, SortOrder::Ascending);
        assert!(store.query_series(&query).await.is_err());
    }
}
