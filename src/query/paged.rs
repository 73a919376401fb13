//! Cursor pagination over one device/key series
//!
//! Three page kinds are supported:
//!
//! | cursor              | scan                    | order returned          |
//! |---------------------|-------------------------|-------------------------|
//! | none                | `[start, end]`          | newest first            |
//! | `end_data_time = c` | `(c, end]`              | newest first            |
//! | `first_data_time=c` | `[start, c)`            | oldest first            |
//!
//! A forward page holds the rows immediately after its cursor and keeps the
//! first page's order. A backward page holds the rows immediately before
//! its cursor in chronological order.
//!
//! The first page also carries the total row count of the (clamped) range.
//! The range is always clamped to its most recent [`MAX_RANGE_DAYS`] days
//! unless the pager is configured otherwise.

use serde_json::{Map, Value as Json};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use crate::error::QueryError;
use crate::storage::{Column, SeriesQuery, SortOrder, StoredRow, TimeBounds, TsStore};
use crate::types::{checked_ms_to_datetime, ms_to_datetime, TimeRange, Value};

/// Rows per page when the request does not say
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Longest range a paged query may span
pub const MAX_RANGE_DAYS: i64 = 100;

/// Where a page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// Most recent rows of the range, plus the total count
    First,
    /// Rows strictly after this instant (ms)
    After(i64),
    /// Rows strictly before this instant (ms)
    Before(i64),
}

impl PageCursor {
    /// Build a cursor from the request pair, where `0` means unset
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidCursor` when both are set, or
    /// `QueryError::TimestampOutOfRange` when the set one is not a
    /// representable instant.
    pub fn from_pair(first_data_time: i64, end_data_time: i64) -> Result<Self, QueryError> {
        for ms in [first_data_time, end_data_time] {
            if checked_ms_to_datetime(ms).is_none() {
                return Err(QueryError::TimestampOutOfRange(ms));
            }
        }
        match (first_data_time, end_data_time) {
            (0, 0) => Ok(PageCursor::First),
            (0, end) => Ok(PageCursor::After(end)),
            (first, 0) => Ok(PageCursor::Before(first)),
            (first, end) => Err(QueryError::InvalidCursor { first, end }),
        }
    }
}

/// One paged history request
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Requested range, clamped before use
    pub range: TimeRange,
    /// Maximum rows in the page
    pub page_size: usize,
    /// Page position
    pub cursor: PageCursor,
}

impl PageRequest {
    /// First page of `key` over `range` with the default page size
    pub fn first(device_id: impl Into<String>, key: impl Into<String>, range: TimeRange) -> Self {
        Self {
            device_id: device_id.into(),
            key: key.into(),
            range,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: PageCursor::First,
        }
    }

    /// Replace the page size; `0` falls back to the default
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    /// Replace the cursor
    pub fn with_cursor(mut self, cursor: PageCursor) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One row of a page, carrying only its populated columns
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    /// Timestamp in Unix milliseconds
    pub ts: i64,
    /// Attribute key
    pub key: String,
    /// Non-sentinel columns with their values
    pub columns: Vec<(Column, Value)>,
}

impl HistoryRow {
    fn from_stored(row: &StoredRow) -> Self {
        Self {
            ts: row.ts_millis(),
            key: row.k.clone(),
            columns: row
                .populated_columns()
                .into_iter()
                .map(|c| (c, row.column_value(c)))
                .collect(),
        }
    }

    /// `{"ts": …, "key": …, "<column>": …}`, with `bool_v` as its TINYINT
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert("ts".to_string(), Json::from(self.ts));
        out.insert("key".to_string(), Json::String(self.key.clone()));
        for (column, value) in &self.columns {
            let json = match value {
                Value::Bool(b) => Json::from(u8::from(*b)),
                other => other.to_json(),
            };
            out.insert(column.name().to_string(), json);
        }
        Json::Object(out)
    }
}

/// A page of rows
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryPage {
    /// Rows in the order they are returned to the caller
    pub rows: Vec<HistoryRow>,
    /// Total rows in the clamped range, first page only
    pub total: Option<u64>,
}

impl HistoryPage {
    /// Oldest timestamp on the page, the cursor for the previous page
    pub fn first_data_time(&self) -> Option<i64> {
        self.rows.iter().map(|r| r.ts).min()
    }

    /// Newest timestamp on the page, the cursor for the next page
    pub fn end_data_time(&self) -> Option<i64> {
        self.rows.iter().map(|r| r.ts).max()
    }

    /// Rows as a JSON array
    pub fn rows_json(&self) -> Json {
        Json::Array(self.rows.iter().map(HistoryRow::to_json).collect())
    }
}

/// Paged reader over the store
#[derive(Clone)]
pub struct PagedHistory {
    store: Arc<dyn TsStore>,
    max_days: i64,
}

impl PagedHistory {
    /// Create a pager reading from `store`
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self {
            store,
            max_days: MAX_RANGE_DAYS,
        }
    }

    /// Override the range clamp
    pub fn with_max_days(mut self, max_days: i64) -> Self {
        self.max_days = max_days;
        self
    }

    /// Fetch one page
    pub async fn page(&self, request: &PageRequest) -> Result<HistoryPage, QueryError> {
        let range = request.range.clamp_to_days(self.max_days);
        let start = range.start_time();
        let end = range.end_time();

        let (bounds, order) = match request.cursor {
            PageCursor::First => (TimeBounds::inclusive(start, end), SortOrder::Descending),
            // oldest rows after the cursor first, flipped below
            PageCursor::After(cursor) => (
                TimeBounds {
                    lower: Bound::Excluded(ms_to_datetime(cursor)),
                    upper: Bound::Included(end),
                },
                SortOrder::Ascending,
            ),
            // newest rows before the cursor first, flipped below
            PageCursor::Before(cursor) => (
                TimeBounds {
                    lower: Bound::Included(start),
                    upper: Bound::Excluded(ms_to_datetime(cursor)),
                },
                SortOrder::Descending,
            ),
        };

        let query = SeriesQuery::new(&request.device_id, &request.key, bounds, order)
            .with_limit(request.page_size);
        let stored = self.store.query_series(&query).await?;
        let mut rows: Vec<HistoryRow> = stored.iter().map(HistoryRow::from_stored).collect();
        if !matches!(request.cursor, PageCursor::First) {
            rows.reverse();
        }

        let total = match request.cursor {
            PageCursor::First => Some(
                self.store
                    .count_series(
                        &request.device_id,
                        &request.key,
                        &TimeBounds::inclusive(start, end),
                    )
                    .await?,
            ),
            _ => None,
        };

        debug!(
            device_id = %request.device_id,
            key = %request.key,
            cursor = ?request.cursor,
            rows = rows.len(),
            total = ?total,
            "History page fetched"
        );
        Ok(HistoryPage { rows, total })
    }
}
