//! Fixed-window aggregation over the numeric column of one series

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::QueryError;
use crate::storage::{AggregateQuery, TsStore};
use crate::types::TimeRange;

/// One aggregation request
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Inclusive range; the first window starts at `range.start`
    pub range: TimeRange,
    /// Window width in milliseconds
    pub window_ms: i64,
    /// Aggregate function, e.g. `avg` or `max`
    pub function: String,
}

impl WindowRequest {
    /// Reject non-positive windows and function names that are not identifiers
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.window_ms <= 0 {
            return Err(QueryError::InvalidWindow(self.window_ms));
        }
        if !is_identifier(&self.function) {
            return Err(QueryError::InvalidAggregateFunction(self.function.clone()));
        }
        Ok(())
    }
}

/// One output window: `[x, x2)` and its aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowPoint {
    /// Window start (ms)
    pub x: i64,
    /// Window end (ms)
    pub x2: i64,
    /// Aggregate, `null` when the store produced none
    pub y: Option<f64>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Runs windowed aggregates against the store
#[derive(Clone)]
pub struct AggregationWindower {
    store: Arc<dyn TsStore>,
}

impl AggregationWindower {
    /// Create a windower reading from `store`
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self { store }
    }

    /// Aggregate the series, one point per non-empty window
    ///
    /// Each point carries the window start reported by the store, so empty
    /// windows never shift later points.
    pub async fn aggregate(&self, request: &WindowRequest) -> Result<Vec<WindowPoint>, QueryError> {
        request.validate()?;

        let query = AggregateQuery {
            device_id: request.device_id.clone(),
            key: request.key.clone(),
            start: request.range.start_time(),
            end: request.range.end_time(),
            window_ms: request.window_ms,
            function: request.function.clone(),
        };
        let windows = self.store.aggregate_windows(&query).await?;

        let points: Vec<WindowPoint> = windows
            .into_iter()
            .map(|w| {
                let x = w.window_start.timestamp_millis();
                WindowPoint {
                    x,
                    x2: x.saturating_add(request.window_ms),
                    y: w.value,
                }
            })
            .collect();

        debug!(
            device_id = %request.device_id,
            key = %request.key,
            function = %request.function,
            window_ms = request.window_ms,
            windows = points.len(),
            "Aggregated series"
        );
        Ok(points)
    }
}
