//! Async ingestion pipeline
//!
//! Bus payloads are decoded into samples, offered to one bounded queue and
//! consumed by a fixed pool of batching workers that bulk-insert into the
//! store.
//!
//! # Architecture
//!
//! ```text
//! [Bus] → [BusIntake] ─try_send─▶ [bounded queue] ─▶ [IngestWorker × N] → [TsStore]
//!              ↓                                            ↓
//!          [Metrics]                                  [PartitionRouter]
//! ```
//!
//! # Components
//!
//! - **Intake**: payload decoding and non-blocking enqueue (drops when full)
//! - **Batch**: per-worker sample buffer with size and age triggers
//! - **Worker**: partition provisioning, periodic flush, drain on shutdown
//! - **Metrics**: per-pipeline counters
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tskv_gateway::ingestion::{IngestionConfig, IngestionPipeline};
//! use tskv_gateway::storage::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = IngestionPipeline::new(IngestionConfig::default(), Arc::new(InMemoryStore::new()))?;
//! pipeline.start()?;
//!
//! let intake = pipeline.intake()?;
//! intake.handle_payload(br#"{"device_id":"sensor-1","values":{"temp":21.5}}"#);
//!
//! let summary = pipeline.shutdown().await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is at most once: samples dropped at a full queue, discarded by a
//! worker or lost to a failed insert are counted but never retried.

pub mod batch;
pub mod intake;
pub mod metrics;
pub mod worker;

pub use batch::{FlushTrigger, SampleBatch};
pub use intake::{BusIntake, IntakeOutcome};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use worker::{IngestWorker, SharedReceiver, WorkerReport, WorkerState};

use crate::error::IngestionError;
use crate::storage::{PartitionRouter, TsStore};
use crate::types::Sample;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    /// Samples per bulk insert before a size-triggered flush
    pub batch_size: usize,
    /// Maximum age of a non-empty batch, checked on every append
    pub batch_wait_time: Duration,
    /// Period of the per-worker flush ticker
    pub flush_interval: Duration,
    /// Capacity of the queue between intake and workers
    pub channel_buffer_size: usize,
    /// Number of write workers
    pub write_workers: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            batch_wait_time: Duration::from_secs(1),
            flush_interval: Duration::from_secs(1),
            channel_buffer_size: 10_000,
            write_workers: 4,
        }
    }
}

impl IngestionConfig {
    /// Maximum allowed number of workers
    const MAX_WORKERS: usize = 64;

    /// Maximum allowed batch size
    const MAX_BATCH_SIZE: usize = 100_000;

    /// Create a new ingestion config builder
    pub fn builder() -> IngestionConfigBuilder {
        IngestionConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.batch_size > Self::MAX_BATCH_SIZE {
            return Err(format!(
                "batch_size {} exceeds maximum allowed {}",
                self.batch_size,
                Self::MAX_BATCH_SIZE
            ));
        }
        if self.flush_interval.is_zero() {
            return Err("flush_interval must be > 0".to_string());
        }
        if self.channel_buffer_size == 0 {
            return Err("channel_buffer_size must be > 0".to_string());
        }
        if self.write_workers == 0 {
            return Err("write_workers must be > 0".to_string());
        }
        if self.write_workers > Self::MAX_WORKERS {
            return Err(format!(
                "write_workers {} exceeds maximum allowed {}",
                self.write_workers,
                Self::MAX_WORKERS
            ));
        }
        Ok(())
    }
}

/// Builder for IngestionConfig
#[derive(Debug, Default)]
pub struct IngestionConfigBuilder {
    config: IngestionConfig,
}

impl IngestionConfigBuilder {
    /// Set batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set maximum batch age
    pub fn batch_wait_time(mut self, wait: Duration) -> Self {
        self.config.batch_wait_time = wait;
        self
    }

    /// Set ticker period
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Set channel buffer size
    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    /// Set worker count
    pub fn write_workers(mut self, workers: usize) -> Self {
        self.config.write_workers = workers;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<IngestionConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Ingestion pipeline
///
/// Owns the queue, the worker pool and the shutdown signal.
pub struct IngestionPipeline {
    config: Arc<IngestionConfig>,
    store: Arc<dyn TsStore>,
    router: PartitionRouter,
    metrics: Arc<IngestionMetrics>,
    /// Dropped on shutdown so the queue closes once intakes are gone
    sender: Option<mpsc::Sender<Sample>>,
    receiver: SharedReceiver,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl IngestionPipeline {
    /// Create a pipeline writing to `store` through the default `ts_kv` table
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::ConfigError` if the configuration is invalid.
    pub fn new(config: IngestionConfig, store: Arc<dyn TsStore>) -> Result<Self, IngestionError> {
        let router = PartitionRouter::new(Arc::clone(&store));
        Self::with_router(config, store, router)
    }

    /// Create a pipeline with an explicit partition router
    pub fn with_router(
        config: IngestionConfig,
        store: Arc<dyn TsStore>,
        router: PartitionRouter,
    ) -> Result<Self, IngestionError> {
        config.validate().map_err(IngestionError::ConfigError)?;

        let (sender, receiver) = mpsc::channel(config.channel_buffer_size);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            store,
            router,
            metrics: Arc::new(IngestionMetrics::new()),
            sender: Some(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown_tx,
            handles: Vec::new(),
        })
    }

    /// Spawn the worker pool
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::ConfigError` when called twice.
    pub fn start(&mut self) -> Result<(), IngestionError> {
        if !self.handles.is_empty() {
            return Err(IngestionError::ConfigError(
                "Ingestion pipeline already running (double start)".to_string(),
            ));
        }

        for id in 0..self.config.write_workers {
            let worker = IngestWorker::new(
                id,
                Arc::clone(&self.config),
                Arc::clone(&self.store),
                self.router.clone(),
                Arc::clone(&self.metrics),
            );
            let queue = Arc::clone(&self.receiver);
            let shutdown = self.shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(worker.run(queue, shutdown)));
        }

        info!(
            workers = self.config.write_workers,
            batch_size = self.config.batch_size,
            queue = self.config.channel_buffer_size,
            store = self.store.store_id(),
            "Ingestion pipeline started"
        );
        Ok(())
    }

    /// A handle that decodes payloads and feeds the queue
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::ChannelClosed` after shutdown began.
    pub fn intake(&self) -> Result<BusIntake, IngestionError> {
        self.sender
            .as_ref()
            .map(|tx| BusIntake::new(tx.clone(), Arc::clone(&self.metrics)))
            .ok_or_else(|| IngestionError::ChannelClosed("pipeline is shutting down".to_string()))
    }

    /// Shared metrics of this pipeline
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Current pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        let queue_depth = self
            .sender
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        PipelineStats::from_metrics(&self.metrics, self.handles.len(), queue_depth)
    }

    /// Gracefully shut down
    ///
    /// Signals every worker, waits for each to flush its batch once and exit,
    /// then logs and returns the final summary.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::ShutdownError` if a worker task panicked; the
    /// remaining workers are still awaited.
    pub async fn shutdown(mut self) -> Result<PipelineStats, IngestionError> {
        info!("Shutting down ingestion pipeline");

        self.sender.take();
        // no receivers means no worker was ever started
        if self.shutdown_tx.send(()).is_err() {
            debug!("No running workers to signal");
        }

        let worker_count = self.handles.len();
        let mut failed = 0usize;
        for handle in self.handles.drain(..) {
            match handle.await {
                Ok(report) => debug!(
                    worker = report.id,
                    rows = report.rows_inserted,
                    "Worker joined"
                ),
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Worker task failed");
                },
            }
        }

        let stats = PipelineStats::from_metrics(&self.metrics, worker_count, 0);
        info!(summary = %stats, "Ingestion pipeline shutdown complete");

        if failed > 0 {
            return Err(IngestionError::ShutdownError(format!(
                "{} of {} workers did not exit cleanly",
                failed, worker_count
            )));
        }
        Ok(stats)
    }
}

/// Pipeline statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Samples accepted into the queue
    pub samples_received: u64,
    /// Samples dropped at the queue
    pub samples_dropped: u64,
    /// Samples discarded by workers, including partition failures
    pub samples_discarded: u64,
    /// Rows inserted into the store
    pub rows_inserted: u64,
    /// Successful flushes
    pub flushes: u64,
    /// Failed flushes
    pub flush_failures: u64,
    /// Spawned workers
    pub workers: usize,
    /// Samples waiting in the queue
    pub queue_depth: usize,
}

impl PipelineStats {
    fn from_metrics(metrics: &IngestionMetrics, workers: usize, queue_depth: usize) -> Self {
        Self {
            samples_received: metrics.samples_received(),
            samples_dropped: metrics.samples_dropped(),
            samples_discarded: metrics.samples_discarded() + metrics.partition_failures(),
            rows_inserted: metrics.rows_inserted(),
            flushes: metrics.total_flushes(),
            flush_failures: metrics.flush_failures(),
            workers,
            queue_depth,
        }
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} dropped={} discarded={} inserted={} flushes={} failed_flushes={} workers={} queued={}",
            self.samples_received,
            self.samples_dropped,
            self.samples_discarded,
            self.rows_inserted,
            self.flushes,
            self.flush_failures,
            self.workers,
            self.queue_depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[test]
    fn test_ingestion_config_default() {
        let config = IngestionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_ingestion_config_builder() {
        let config = IngestionConfig::builder()
            .batch_size(50)
            .write_workers(2)
            .channel_buffer_size(5000)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.write_workers, 2);
        assert_eq!(config.channel_buffer_size, 5000);
    }

    #[test]
    fn test_ingestion_config_validation() {
        assert!(IngestionConfig::builder().batch_size(0).build().is_err());
        assert!(IngestionConfig::builder().write_workers(0).build().is_err());
        assert!(IngestionConfig::builder().write_workers(65).build().is_err());
        assert!(IngestionConfig::builder()
            .channel_buffer_size(0)
            .build()
            .is_err());
        assert!(IngestionConfig::builder()
            .flush_interval(Duration::ZERO)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut pipeline =
            IngestionPipeline::new(IngestionConfig::default(), Arc::new(InMemoryStore::new()))
                .unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.start().is_err());
        let stats = pipeline.shutdown().await.unwrap();
        assert_eq!(stats.workers, 4);
    }

    #[tokio::test]
    async fn test_stats_display() {
        let pipeline =
            IngestionPipeline::new(IngestionConfig::default(), Arc::new(InMemoryStore::new()))
                .unwrap();
        let text = pipeline.stats().to_string();
        assert!(text.starts_with("received=0 dropped=0"));
    }
}
