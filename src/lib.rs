//! tskv-gateway - device telemetry ingestion and history queries over a wide-row TSDB
//!
//! This library provides:
//! - A pub/sub subscriber decoding device reports into typed samples
//! - A bounded, batching worker pool writing samples into per-device partitions
//! - History queries: multi-key merge, cursor paging, windowed aggregation
//! - An HTTP RPC surface with Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics for the RPC surface
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Redis Pub/Sub subscriber for device reports
pub mod bus;

/// Async ingestion pipeline: intake, batching, partition provisioning, bulk writes
pub mod ingestion;

/// History query engines over the store
pub mod query;

/// HTTP RPC surface for history queries
pub mod rpc;

// Re-export main types
pub use error::{Error, Result};
pub use storage::{InMemoryStore, TdengineStore, TsStore};
pub use types::{Sample, TimeRange, Value};
