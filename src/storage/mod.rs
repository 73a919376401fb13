//! Time-series store abstraction
//!
//! The gateway never talks SQL outside this module. Ingestion and the query
//! engines work against the [`TsStore`] trait; two backends implement it:
//!
//! - [`tdengine::TdengineStore`]: TDengine over its REST endpoint
//! - [`memory::InMemoryStore`]: in-process store for tests and local runs
//!
//! # Layout
//!
//! ```text
//! things.ts_kv                (logical table, tags: model_id, model_name)
//!   ├── ts_kv_sensor          (partition for devices "sensor-*")
//!   └── ts_kv_unit42          (partition for device "unit42")
//! ```

pub mod memory;
pub mod partition;
pub mod row;
pub mod tdengine;

pub use memory::InMemoryStore;
pub use partition::{partition_name, PartitionRouter, PartitionTags};
pub use row::{
    check_widths, Column, StoredRow, TableRow, BOOL_DEFAULT, IDENT_WIDTH, NUMBER_DEFAULT,
    STRING_DEFAULT, STRING_WIDTH,
};
pub use tdengine::{TdengineConfig, TdengineStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::Bound;

use crate::error::StoreError;

/// Sort direction for series scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    Ascending,
    /// Newest first
    Descending,
}

impl SortOrder {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Time bounds of a scan, each side inclusive, exclusive or open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    /// Lower bound
    pub lower: Bound<DateTime<Utc>>,
    /// Upper bound
    pub upper: Bound<DateTime<Utc>>,
}

impl TimeBounds {
    /// Both ends inclusive
    pub fn inclusive(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            lower: Bound::Included(start),
            upper: Bound::Included(end),
        }
    }

    /// Whether `ts` satisfies both bounds
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        let lower_ok = match &self.lower {
            Bound::Included(l) => ts >= l,
            Bound::Excluded(l) => ts > l,
            Bound::Unbounded => true,
        };
        let upper_ok = match &self.upper {
            Bound::Included(u) => ts <= u,
            Bound::Excluded(u) => ts < u,
            Bound::Unbounded => true,
        };
        lower_ok && upper_ok
    }
}

/// Scan of one device/key series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Time bounds
    pub bounds: TimeBounds,
    /// Result order
    pub order: SortOrder,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

impl SeriesQuery {
    /// Unlimited scan over inclusive bounds
    pub fn new(
        device_id: impl Into<String>,
        key: impl Into<String>,
        bounds: TimeBounds,
        order: SortOrder,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            key: key.into(),
            bounds,
            order,
            limit: None,
        }
    }

    /// Cap the number of returned rows
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Windowed aggregate over the numeric column of one series
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// First window starts here (inclusive)
    pub start: DateTime<Utc>,
    /// Scan end (inclusive)
    pub end: DateTime<Utc>,
    /// Window width in milliseconds (> 0)
    pub window_ms: i64,
    /// Store-side aggregate function name (validated identifier)
    pub function: String,
}

/// One aggregated window as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct WindowValue {
    /// Start of the window this aggregate belongs to
    pub window_start: DateTime<Utc>,
    /// Aggregate value, `None` when the store returned null
    pub value: Option<f64>,
}

/// Core trait for time-series store backends
#[async_trait]
pub trait TsStore: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn store_id(&self) -> &str;

    /// Create the database and the logical table if they do not exist
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Create a partition if it does not exist
    async fn create_partition(
        &self,
        partition: &str,
        tags: &PartitionTags,
    ) -> Result<(), StoreError>;

    /// Bulk insert rows, returning the number of rows the store accepted
    async fn insert_rows(&self, rows: &[TableRow]) -> Result<usize, StoreError>;

    /// Scan one series
    async fn query_series(&self, query: &SeriesQuery) -> Result<Vec<StoredRow>, StoreError>;

    /// Count rows of one series inside the bounds
    async fn count_series(
        &self,
        device_id: &str,
        key: &str,
        bounds: &TimeBounds,
    ) -> Result<u64, StoreError>;

    /// Aggregate one series into fixed windows anchored at `query.start`
    ///
    /// Only non-empty windows are returned, in chronological order, each
    /// carrying its own window start.
    async fn aggregate_windows(
        &self,
        query: &AggregateQuery,
    ) -> Result<Vec<WindowValue>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ms_to_datetime;

    #[test]
    fn test_time_bounds_contains() {
        let bounds = TimeBounds {
            lower: Bound::Excluded(ms_to_datetime(10)),
            upper: Bound::Included(ms_to_datetime(20)),
        };
        assert!(!bounds.contains(&ms_to_datetime(10)));
        assert!(bounds.contains(&ms_to_datetime(11)));
        assert!(bounds.contains(&ms_to_datetime(20)));
        assert!(!bounds.contains(&ms_to_datetime(21)));
    }

    #[test]
    fn test_sort_order_sql() {
        assert_eq!(SortOrder::Ascending.as_sql(), "ASC");
        assert_eq!(SortOrder::Descending.as_sql(), "DESC");
    }
}
