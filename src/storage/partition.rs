//! Partition (sub-table) routing
//!
//! Devices are grouped into sub-tables of the logical `ts_kv` table by the
//! part of their id before the first `-`. Sub-tables are created lazily with a
//! create-if-not-exists statement right before the first row lands in them.

use std::sync::Arc;

use tracing::{debug, warn};

use super::TsStore;
use crate::error::StoreError;

/// Default logical table name
pub const DEFAULT_TABLE: &str = "ts_kv";

/// Tag values attached to a partition at creation
///
/// The logical table declares `(model_id, model_name)` tag columns. When no
/// classification is known the device id and the literal `"device"` are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTags {
    /// First tag column (`model_id`)
    pub model_id: String,
    /// Second tag column (`model_name`)
    pub model_name: String,
}

impl PartitionTags {
    /// Default tags for a device
    pub fn for_device(device_id: &str) -> Self {
        Self {
            model_id: device_id.to_string(),
            model_name: "device".to_string(),
        }
    }

    /// Tags from explicit classification metadata
    pub fn classified(model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            model_name: model_name.into(),
        }
    }
}

/// Derives partition names and provisions partitions through a store
#[derive(Clone)]
pub struct PartitionRouter {
    table: String,
    store: Arc<dyn TsStore>,
}

impl PartitionRouter {
    /// Create a router for the default `ts_kv` table
    pub fn new(store: Arc<dyn TsStore>) -> Self {
        Self::with_table(store, DEFAULT_TABLE)
    }

    /// Create a router for a custom logical table name
    pub fn with_table(store: Arc<dyn TsStore>, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            store,
        }
    }

    /// Partition name for a device
    pub fn resolve_partition_name(&self, device_id: &str) -> String {
        partition_name(&self.table, device_id)
    }

    /// Create the partition if it does not exist yet
    ///
    /// Errors are returned to the caller untouched: no retry happens here.
    pub async fn ensure_partition(
        &self,
        name: &str,
        tags: &PartitionTags,
    ) -> Result<(), StoreError> {
        match self.store.create_partition(name, tags).await {
            Ok(()) => {
                debug!(partition = name, model_id = %tags.model_id, "Partition ensured");
                Ok(())
            },
            Err(e) => {
                warn!(partition = name, error = %e, "Failed to ensure partition");
                Err(e)
            },
        }
    }
}

/// Build `<table>_<prefix>` where prefix is the device id up to its first `-`
///
/// ```rust
/// use tskv_gateway::storage::partition::partition_name;
///
/// assert_eq!(partition_name("ts_kv", "sensor-001"), "ts_kv_sensor");
/// assert_eq!(partition_name("ts_kv", "unit42"), "ts_kv_unit42");
/// ```
pub fn partition_name(table: &str, device_id: &str) -> String {
    let prefix = device_id.split('-').next().unwrap_or(device_id);
    format!("{}_{}", table, prefix)
}
