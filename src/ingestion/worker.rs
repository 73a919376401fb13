//! Batching write workers
//!
//! Each worker pulls samples from the shared queue, provisions partitions on
//! first sight and bulk-inserts its local batch when one of the flush
//! triggers fires:
//!
//! ```text
//!           sample            len >= batch_size / age >= wait / tick
//!   Idle ───────────▶ Accumulating ──────────────────────────────▶ Flushing
//!    ▲                     │                                          │
//!    └─────────────────────┼──────────────────────────────────────────┘
//!                          │ shutdown / queue closed
//!                          ▼
//!                      Draining (flush once, exit)
//! ```
//!
//! A failed insert is logged and the batch is dropped; nothing is retried.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::batch::{FlushTrigger, SampleBatch};
use super::metrics::IngestionMetrics;
use super::IngestionConfig;
use crate::storage::{PartitionRouter, PartitionTags, TsStore};
use crate::types::Sample;

/// Queue receiver shared by every worker of a pipeline
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Sample>>>;

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Batch empty, waiting for samples
    Idle,
    /// Batch non-empty, no trigger fired yet
    Accumulating,
    /// Bulk insert in progress
    Flushing,
    /// Shutting down; final flush then exit
    Draining,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Idle => "idle",
            WorkerState::Accumulating => "accumulating",
            WorkerState::Flushing => "flushing",
            WorkerState::Draining => "draining",
        };
        f.write_str(label)
    }
}

/// Per-worker totals returned when a worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker ID
    pub id: usize,
    /// Samples taken off the queue
    pub samples_seen: u64,
    /// Rows the store accepted
    pub rows_inserted: u64,
    /// Successful flushes
    pub flushes: u64,
}

/// A single batching write worker
pub struct IngestWorker {
    id: usize,
    config: Arc<IngestionConfig>,
    store: Arc<dyn TsStore>,
    router: PartitionRouter,
    metrics: Arc<IngestionMetrics>,
    /// Partitions this worker already created
    ensured: HashSet<String>,
    batch: SampleBatch,
    state: WorkerState,
    report: WorkerReport,
}

impl IngestWorker {
    /// Create a worker
    pub fn new(
        id: usize,
        config: Arc<IngestionConfig>,
        store: Arc<dyn TsStore>,
        router: PartitionRouter,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let batch = SampleBatch::with_capacity(config.batch_size);
        Self {
            id,
            config,
            store,
            router,
            metrics,
            ensured: HashSet::new(),
            batch,
            state: WorkerState::Idle,
            report: WorkerReport {
                id,
                ..Default::default()
            },
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Samples waiting in the local batch
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Run until shutdown or until the queue is closed and empty
    ///
    /// Queue items are preferred over the ticker and the shutdown signal, so
    /// samples already queued when shutdown is requested are still consumed.
    pub async fn run(
        mut self,
        queue: SharedReceiver,
        mut shutdown: broadcast::Receiver<()>,
    ) -> WorkerReport {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        debug!(worker = self.id, "Ingest worker started");

        loop {
            tokio::select! {
                biased;

                next = recv(&queue) => match next {
                    Some(sample) => self.handle_sample(sample).await,
                    None => {
                        debug!(worker = self.id, "Queue closed");
                        break;
                    },
                },

                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush(FlushTrigger::Timer).await;
                    }
                },

                _ = shutdown.recv() => {
                    debug!(worker = self.id, "Shutdown signal received");
                    break;
                },
            }
        }

        self.drain().await;
        info!(
            worker = self.id,
            samples = self.report.samples_seen,
            rows = self.report.rows_inserted,
            flushes = self.report.flushes,
            "Ingest worker stopped"
        );
        self.report
    }

    /// Process one sample taken off the queue
    pub async fn handle_sample(&mut self, sample: Sample) {
        self.report.samples_seen += 1;

        if sample.device_id.is_empty() {
            warn!(worker = self.id, key = %sample.key, "Discarding sample without device_id");
            self.metrics.record_discarded();
            return;
        }

        let partition = self.router.resolve_partition_name(&sample.device_id);
        if !self.ensured.contains(&partition) {
            let tags = PartitionTags::for_device(&sample.device_id);
            if let Err(e) = self.router.ensure_partition(&partition, &tags).await {
                warn!(
                    worker = self.id,
                    device_id = %sample.device_id,
                    partition = %partition,
                    error = %e,
                    "Discarding sample, partition unavailable"
                );
                self.metrics.record_partition_failure();
                return;
            }
            self.ensured.insert(partition.clone());
        }

        self.batch.push(partition, sample);
        self.state = WorkerState::Accumulating;

        if let Some(trigger) = self
            .batch
            .due(self.config.batch_size, self.config.batch_wait_time)
        {
            self.flush(trigger).await;
        }
    }

    /// Bulk insert the local batch and clear it
    pub async fn flush(&mut self, trigger: FlushTrigger) {
        if self.batch.is_empty() {
            return;
        }
        if self.state != WorkerState::Draining {
            self.state = WorkerState::Flushing;
        }

        let sequence = self.batch.sequence();
        let rows = self.batch.take_rows();
        let start = Instant::now();

        match self.store.insert_rows(&rows).await {
            Ok(inserted) => {
                let latency = start.elapsed();
                self.metrics
                    .record_flush(trigger, inserted as u64, latency);
                self.report.rows_inserted += inserted as u64;
                self.report.flushes += 1;
                debug!(
                    worker = self.id,
                    batch = sequence,
                    rows = inserted,
                    trigger = %trigger,
                    latency_us = latency.as_micros() as u64,
                    "Flushed batch"
                );
            },
            Err(e) => {
                self.metrics.record_flush_failure(rows.len() as u64);
                warn!(
                    worker = self.id,
                    batch = sequence,
                    rows = rows.len(),
                    trigger = %trigger,
                    error = %e,
                    "Bulk insert failed, batch dropped"
                );
            },
        }

        if self.state != WorkerState::Draining {
            self.state = WorkerState::Idle;
        }
    }

    async fn drain(&mut self) {
        self.state = WorkerState::Draining;
        self.flush(FlushTrigger::Drain).await;
    }
}

async fn recv(queue: &Mutex<mpsc::Receiver<Sample>>) -> Option<Sample> {
    queue.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::Value;
    use std::time::Duration;

    fn worker(store: Arc<InMemoryStore>, batch_size: usize) -> (IngestWorker, Arc<IngestionMetrics>) {
        let config = IngestionConfig::builder()
            .batch_size(batch_size)
            .batch_wait_time(Duration::from_secs(60))
            .flush_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let metrics = Arc::new(IngestionMetrics::new());
        let worker = IngestWorker::new(
            0,
            Arc::new(config),
            store.clone(),
            PartitionRouter::new(store),
            metrics.clone(),
        );
        (worker, metrics)
    }

    fn sample(device: &str, i: usize) -> Sample {
        Sample::now(device, "temp", Value::Number(i as f64))
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_exactly_batch_size() {
        let store = Arc::new(InMemoryStore::new());
        let (mut worker, metrics) = worker(store.clone(), 3);

        for i in 0..7 {
            worker.handle_sample(sample("sensor-1", i)).await;
        }
        assert_eq!(store.insert_calls(), vec![3, 3]);
        assert_eq!(worker.pending(), 1);
        assert_eq!(worker.state(), WorkerState::Accumulating);

        worker.drain().await;
        assert_eq!(store.insert_calls(), vec![3, 3, 1]);
        assert_eq!(metrics.flushes(FlushTrigger::Size), 2);
        assert_eq!(metrics.flushes(FlushTrigger::Drain), 1);
        assert_eq!(metrics.rows_inserted(), 7);
        assert_eq!(worker.state(), WorkerState::Draining);
    }

    #[tokio::test]
    async fn test_partition_created_once_per_worker() {
        let store = Arc::new(InMemoryStore::new());
        let (mut worker, _) = worker(store.clone(), 100);

        worker.handle_sample(sample("sensor-1", 0)).await;
        worker.handle_sample(sample("sensor-2", 1)).await;
        worker.handle_sample(sample("pump-1", 2)).await;

        assert_eq!(store.create_calls(), 2);
        assert_eq!(store.partition_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_device_is_discarded() {
        let store = Arc::new(InMemoryStore::new());
        let (mut worker, metrics) = worker(store.clone(), 100);

        worker.handle_sample(sample("", 0)).await;
        assert_eq!(worker.pending(), 0);
        assert_eq!(metrics.samples_discarded(), 1);
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_partition_failure_discards_only_that_sample() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_partition("ts_kv_bad");
        let (mut worker, metrics) = worker(store.clone(), 100);

        worker.handle_sample(sample("bad-1", 0)).await;
        worker.handle_sample(sample("good-1", 1)).await;
        worker.flush(FlushTrigger::Timer).await;

        assert_eq!(metrics.partition_failures(), 1);
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.rows()[0].row.device_id, "good-1");
    }

    #[tokio::test]
    async fn test_failed_insert_drops_batch() {
        let store = Arc::new(InMemoryStore::new());
        let (mut worker, metrics) = worker(store.clone(), 2);
        store.set_fail_inserts(true);

        worker.handle_sample(sample("sensor-1", 0)).await;
        worker.handle_sample(sample("sensor-1", 1)).await;

        assert_eq!(worker.pending(), 0);
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(metrics.flush_failures(), 1);
        assert_eq!(metrics.rows_inserted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_flushes_partial_batch() {
        let store = Arc::new(InMemoryStore::new());
        let config = IngestionConfig::builder()
            .batch_size(100)
            .batch_wait_time(Duration::from_secs(60))
            .flush_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let metrics = Arc::new(IngestionMetrics::new());
        let worker = IngestWorker::new(
            0,
            Arc::new(config),
            store.clone(),
            PartitionRouter::new(store.clone()),
            metrics.clone(),
        );

        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(worker.run(Arc::new(Mutex::new(rx)), shutdown_rx));

        tx.send(sample("sensor-1", 0)).await.unwrap();
        tx.send(sample("sensor-1", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.insert_calls(), vec![2]);
        assert_eq!(metrics.flushes(FlushTrigger::Timer), 1);

        shutdown_tx.send(()).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.samples_seen, 2);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(metrics.flushes(FlushTrigger::Drain), 0);
    }

    #[tokio::test]
    async fn test_queue_close_drains() {
        let store = Arc::new(InMemoryStore::new());
        let (worker, metrics) = worker(store.clone(), 100);

        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        for i in 0..5 {
            tx.send(sample("sensor-1", i)).await.unwrap();
        }
        drop(tx);

        let report = worker.run(Arc::new(Mutex::new(rx)), shutdown_rx).await;
        assert_eq!(report.rows_inserted, 5);
        assert_eq!(metrics.flushes(FlushTrigger::Drain), 1);
        assert_eq!(store.insert_calls(), vec![5]);
    }

    #[test]
    fn test_worker_state_display() {
        assert_eq!(WorkerState::Accumulating.to_string(), "accumulating");
        assert_eq!(WorkerState::Draining.to_string(), "draining");
    }
}
