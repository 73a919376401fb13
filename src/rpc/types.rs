//! Request and reply bodies of the history RPC surface
//!
//! Every timestamp is Unix milliseconds. Missing fields take their zero
//! value, which the service treats as "unset" where that has a meaning.

use serde::{Deserialize, Serialize};

// =============================================================================
// Requests
// =============================================================================

/// `GetDeviceAttributesHistory`: several keys merged into aligned rows
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AttributesHistoryRequest {
    /// Device identifier
    pub device_id: String,
    /// Keys to merge
    pub attribute: Vec<String>,
    /// Range start (ms)
    pub start_time: i64,
    /// Range end (ms)
    pub end_time: i64,
}

/// `GetDeviceHistory`: newest rows of one key plus the total count
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceHistoryRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Range start (ms)
    pub start_time: i64,
    /// Range end (ms)
    pub end_time: i64,
    /// Rows to return, configured default when `<= 0`
    pub limit: i64,
}

/// `GetDeviceHistoryWithPageAndPage`: cursor pagination
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PagedHistoryRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Range start (ms)
    pub start_time: i64,
    /// Range end (ms)
    pub end_time: i64,
    /// Rows per page, configured default when `<= 0`
    pub page_records: i64,
    /// Backward cursor: oldest timestamp of the current page, 0 when unset
    pub first_data_time: i64,
    /// Forward cursor: newest timestamp of the current page, 0 when unset
    pub end_data_time: i64,
}

/// `GetDeviceKVDataWithNoAggregate`: raw plot points
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SeriesRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Range start (ms)
    pub start_time: i64,
    /// Range end (ms)
    pub end_time: i64,
}

/// `GetDeviceKVDataWithAggregate`: fixed-window aggregate
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregateRequest {
    /// Device identifier
    pub device_id: String,
    /// Attribute key
    pub key: String,
    /// Range start (ms)
    pub start_time: i64,
    /// Range end (ms)
    pub end_time: i64,
    /// Aggregate function, e.g. `avg`
    pub aggregate_func: String,
    /// Window width (ms)
    pub aggregate_window: i64,
}

// =============================================================================
// Reply
// =============================================================================

/// Status of a successful reply
pub const STATUS_OK: i32 = 1;

/// Status of a failed reply
pub const STATUS_ERROR: i32 = 0;

/// Uniform reply envelope
///
/// `data` is a JSON document serialized to a string; it is `"{}"` whenever
/// `status` is [`STATUS_ERROR`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Reply {
    /// 1 on success, 0 on failure
    pub status: i32,
    /// Error description, empty on success
    pub message: String,
    /// JSON payload as a string
    pub data: String,
}

impl Reply {
    /// Successful reply carrying `data`
    pub fn ok(data: &serde_json::Value) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            data: data.to_string(),
        }
    }

    /// Failed reply with an empty payload
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
            data: "{}".to_string(),
        }
    }

    /// Whether `status` is [`STATUS_OK`]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Parse `data` back into JSON
    pub fn data_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Health check body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the server answers
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}
