//! History query engines
//!
//! Four read paths over the wide-row store, each stateless and safe to call
//! concurrently:
//!
//! - [`merge`]: k-way time alignment of several keys into synchronized rows
//! - [`paged`]: cursor pagination over one key
//! - [`window`]: fixed-window aggregation over one key
//! - [`series`]: raw ascending plot points for one key
//!
//! # Architecture
//!
//! ```text
//! RPC request
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Validate   │  range order, cursor pair, window, function name
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  TsStore::query_series / count_series / aggregate_windows
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Shape     │  sentinel suppression, alignment, JSON
//! └─────────────┘
//! ```

pub mod merge;
pub mod paged;
pub mod series;
pub mod window;

pub use merge::{merge_series, HistoryMerger, MergedHistory, MergedRow, SeriesPoint};
pub use paged::{
    HistoryPage, HistoryRow, PageCursor, PageRequest, PagedHistory, DEFAULT_PAGE_SIZE,
    MAX_RANGE_DAYS,
};
pub use series::{PlotPoint, RawSeries};
pub use window::{AggregationWindower, WindowPoint, WindowRequest};

use tracing::warn;

use crate::error::ValueError;
use crate::storage::StoredRow;
use crate::types::Value;

/// Decode the value of a stored row, resolving integrity violations
///
/// A row with more than one non-sentinel column is logged and read through
/// the string → number → bool precedence instead of failing the query.
pub(crate) fn read_value(row: &StoredRow) -> Option<Value> {
    match row.decode() {
        Ok(value) => value,
        Err(ValueError::AmbiguousType { populated }) => {
            warn!(
                device_id = %row.device_id,
                key = %row.k,
                ts = row.ts_millis(),
                populated,
                "Stored row has several typed columns set"
            );
            row.decode_lenient()
        },
        Err(e) => {
            warn!(device_id = %row.device_id, key = %row.k, error = %e, "Undecodable row");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ms_to_datetime;

    #[test]
    fn test_read_value_resolves_ambiguity() {
        let mut row =
            StoredRow::from_value(ms_to_datetime(1), "d", "k", &Value::Number(2.0));
        assert_eq!(read_value(&row), Some(Value::Number(2.0)));

        row.bool_v = 1;
        assert_eq!(read_value(&row), Some(Value::Number(2.0)));
    }
}
