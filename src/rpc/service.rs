//! History service: the five RPC operations over the query engines
//!
//! Every operation returns a [`Reply`]; failures never escape as errors.
//! The reply message is the display string of the failure.

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::types::{
    AggregateRequest, AttributesHistoryRequest, DeviceHistoryRequest, PagedHistoryRequest, Reply,
    SeriesRequest,
};
use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::query::{
    AggregationWindower, HistoryMerger, PageCursor, PageRequest, PagedHistory, RawSeries,
    WindowRequest,
};
use crate::storage::TsStore;
use crate::types::TimeRange;

/// Failures turned into `status = 0` replies
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Query validation or store failure
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Request shape the operation does not serve
    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    /// The range holds no rows
    #[error("No history in range")]
    Empty,

    /// Reply payload could not be encoded
    #[error("Failed to encode reply: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The history RPC operations
#[derive(Clone)]
pub struct HistoryService {
    merger: HistoryMerger,
    pager: PagedHistory,
    windower: AggregationWindower,
    series: RawSeries,
    settings: QueryConfig,
}

impl HistoryService {
    /// Service with default query settings
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self::with_settings(store, QueryConfig::default())
    }

    /// Service with explicit query settings
    pub fn with_settings(store: Arc<dyn TsStore>, settings: QueryConfig) -> Self {
        Self {
            merger: HistoryMerger::new(Arc::clone(&store)),
            pager: PagedHistory::new(Arc::clone(&store)).with_max_days(settings.max_range_days),
            windower: AggregationWindower::new(Arc::clone(&store)),
            series: RawSeries::new(store),
            settings,
        }
    }

    /// `GetDeviceAttributesHistory`
    pub async fn get_device_attributes_history(&self, req: &AttributesHistoryRequest) -> Reply {
        respond("GetDeviceAttributesHistory", self.attributes_history(req).await)
    }

    /// `GetDeviceHistory`
    pub async fn get_device_history(&self, req: &DeviceHistoryRequest) -> Reply {
        respond("GetDeviceHistory", self.device_history(req).await)
    }

    /// `GetDeviceHistoryWithPageAndPage`
    pub async fn get_device_history_with_page(&self, req: &PagedHistoryRequest) -> Reply {
        respond("GetDeviceHistoryWithPageAndPage", self.paged_history(req).await)
    }

    /// `GetDeviceKVDataWithNoAggregate`
    pub async fn get_kv_data_without_aggregate(&self, req: &SeriesRequest) -> Reply {
        respond("GetDeviceKVDataWithNoAggregate", self.raw_series(req).await)
    }

    /// `GetDeviceKVDataWithAggregate`
    pub async fn get_kv_data_with_aggregate(&self, req: &AggregateRequest) -> Reply {
        respond("GetDeviceKVDataWithAggregate", self.aggregate(req).await)
    }

    async fn attributes_history(
        &self,
        req: &AttributesHistoryRequest,
    ) -> Result<serde_json::Value, ServiceError> {
        require(&req.device_id, "device_id")?;
        let range = TimeRange::new(req.start_time, req.end_time)?;
        let history = self.merger.merge(&req.device_id, &req.attribute, range).await?;
        Ok(history.to_json())
    }

    async fn device_history(
        &self,
        req: &DeviceHistoryRequest,
    ) -> Result<serde_json::Value, ServiceError> {
        require(&req.device_id, "device_id")?;
        if req.key.is_empty() {
            return Err(ServiceError::NotSupported("history without a key"));
        }
        let range = TimeRange::new(req.start_time, req.end_time)?;
        let limit = positive_or(req.limit, self.settings.history_limit);

        let request = PageRequest::first(&req.device_id, &req.key, range).with_page_size(limit);
        let page = self.pager.page(&request).await?;
        let total = page.total.unwrap_or(0);
        if total == 0 {
            return Err(ServiceError::Empty);
        }

        Ok(json!({
            "total": total,
            "data": page.rows_json(),
        }))
    }

    async fn paged_history(
        &self,
        req: &PagedHistoryRequest,
    ) -> Result<serde_json::Value, ServiceError> {
        require(&req.device_id, "device_id")?;
        require(&req.key, "key")?;
        let range = TimeRange::new(req.start_time, req.end_time)?;
        let cursor = PageCursor::from_pair(req.first_data_time, req.end_data_time)?;
        let page_size = positive_or(req.page_records, self.settings.page_size);

        let request = PageRequest::first(&req.device_id, &req.key, range)
            .with_page_size(page_size)
            .with_cursor(cursor);
        Ok(self.pager.page(&request).await?.rows_json())
    }

    async fn raw_series(&self, req: &SeriesRequest) -> Result<serde_json::Value, ServiceError> {
        require(&req.device_id, "device_id")?;
        require(&req.key, "key")?;
        let range = TimeRange::new(req.start_time, req.end_time)?;
        let points = self.series.points(&req.device_id, &req.key, range).await?;
        Ok(serde_json::to_value(points)?)
    }

    async fn aggregate(&self, req: &AggregateRequest) -> Result<serde_json::Value, ServiceError> {
        require(&req.device_id, "device_id")?;
        require(&req.key, "key")?;
        let request = WindowRequest {
            device_id: req.device_id.clone(),
            key: req.key.clone(),
            range: TimeRange::new(req.start_time, req.end_time)?,
            window_ms: req.aggregate_window,
            function: req.aggregate_func.clone(),
        };
        let points = self.windower.aggregate(&request).await?;
        Ok(serde_json::to_value(points)?)
    }
}

fn require(value: &str, field: &'static str) -> Result<(), QueryError> {
    if value.is_empty() {
        return Err(QueryError::MissingField(field));
    }
    Ok(())
}

fn positive_or(requested: i64, fallback: usize) -> usize {
    usize::try_from(requested)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(fallback)
}

fn respond(method: &'static str, result: Result<serde_json::Value, ServiceError>) -> Reply {
    match result {
        Ok(data) => Reply::ok(&data),
        Err(e) => {
            warn!(method, error = %e, "RPC call failed");
            Reply::error(e.to_string())
        },
    }
}
