//! Ingestion-specific metrics collection
//!
//! Counters for the intake, the workers and the store writes. One instance is
//! owned by each [`IngestionPipeline`](super::IngestionPipeline) and shared
//! with its workers and intake handles; nothing here is process-global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::batch::FlushTrigger;

/// Ingestion metrics collector
///
/// Thread-safe metrics collection for the ingestion pipeline.
/// Uses atomic operations for lock-free updates.
pub struct IngestionMetrics {
    // === Intake Counters ===
    /// Samples accepted into the queue
    samples_received: AtomicU64,
    /// Samples dropped because the queue was full or closed
    samples_dropped: AtomicU64,
    /// Payloads that could not be decoded at all
    malformed_payloads: AtomicU64,
    /// Values skipped because their JSON type is not storable
    unsupported_values: AtomicU64,

    // === Worker Counters ===
    /// Samples discarded by a worker (empty device id)
    samples_discarded: AtomicU64,
    /// Samples discarded because their partition could not be created
    partition_failures: AtomicU64,

    // === Write Counters ===
    /// Rows the store reported as inserted
    rows_inserted: AtomicU64,
    /// Rows lost to failed bulk inserts
    rows_failed: AtomicU64,
    /// Flushes triggered by batch size
    flushes_size: AtomicU64,
    /// Flushes triggered by the ticker or the batch age check
    flushes_timer: AtomicU64,
    /// Flushes performed while draining on shutdown
    flushes_drain: AtomicU64,
    /// Bulk inserts that failed
    flush_failures: AtomicU64,

    // === Latency Tracking (simple average) ===
    /// Sum of insert latencies in microseconds
    write_latency_sum_us: AtomicU64,
    /// Count of insert latency samples
    write_latency_count: AtomicU64,

    // === Timing ===
    /// When metrics collection started
    start_time: Instant,
}

impl IngestionMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            unsupported_values: AtomicU64::new(0),
            samples_discarded: AtomicU64::new(0),
            partition_failures: AtomicU64::new(0),
            rows_inserted: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            flushes_size: AtomicU64::new(0),
            flushes_timer: AtomicU64::new(0),
            flushes_drain: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            write_latency_sum_us: AtomicU64::new(0),
            write_latency_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // === Recording Methods ===

    /// Record samples accepted into the queue
    #[inline]
    pub fn record_received(&self, count: u64) {
        let _ =
            self.samples_received
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.saturating_add(count))
                });
    }

    /// Record samples dropped under backpressure
    #[inline]
    pub fn record_dropped(&self, count: u64) {
        self.samples_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a payload that could not be decoded
    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped value of unsupported type
    #[inline]
    pub fn record_unsupported(&self) {
        self.unsupported_values.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample discarded by a worker
    #[inline]
    pub fn record_discarded(&self) {
        self.samples_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample lost to a partition provisioning failure
    #[inline]
    pub fn record_partition_failure(&self) {
        self.partition_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful flush
    #[inline]
    pub fn record_flush(&self, trigger: FlushTrigger, rows: u64, latency: Duration) {
        let _ = self
            .rows_inserted
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(rows))
            });
        self.trigger_counter(trigger).fetch_add(1, Ordering::Relaxed);

        let latency_us = latency.as_micros() as u64;
        let _ = self.write_latency_sum_us.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| Some(current.saturating_add(latency_us)),
        );
        self.write_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed flush and the rows it lost
    #[inline]
    pub fn record_flush_failure(&self, rows: u64) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        self.rows_failed.fetch_add(rows, Ordering::Relaxed);
    }

    fn trigger_counter(&self, trigger: FlushTrigger) -> &AtomicU64 {
        match trigger {
            FlushTrigger::Size => &self.flushes_size,
            FlushTrigger::Timer => &self.flushes_timer,
            FlushTrigger::Drain => &self.flushes_drain,
        }
    }

    // === Query Methods ===

    /// Get total samples received
    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    /// Get total samples dropped
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Get total samples discarded by workers
    pub fn samples_discarded(&self) -> u64 {
        self.samples_discarded.load(Ordering::Relaxed)
    }

    /// Get total partition failures
    pub fn partition_failures(&self) -> u64 {
        self.partition_failures.load(Ordering::Relaxed)
    }

    /// Get total rows inserted
    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted.load(Ordering::Relaxed)
    }

    /// Get the number of successful flushes for a trigger
    pub fn flushes(&self, trigger: FlushTrigger) -> u64 {
        self.trigger_counter(trigger).load(Ordering::Relaxed)
    }

    /// Get total successful flushes across all triggers
    pub fn total_flushes(&self) -> u64 {
        self.flushes(FlushTrigger::Size)
            + self.flushes(FlushTrigger::Timer)
            + self.flushes(FlushTrigger::Drain)
    }

    /// Get total failed flushes
    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Get average insert latency in microseconds
    pub fn avg_write_latency_us(&self) -> u64 {
        let sum = self.write_latency_sum_us.load(Ordering::Relaxed);
        let count = self.write_latency_count.load(Ordering::Relaxed);
        if count > 0 {
            sum / count
        } else {
            0
        }
    }

    /// Get uptime since metrics collection started
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Calculate rows per second throughput
    pub fn rows_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_inserted() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_received: self.samples_received(),
            samples_dropped: self.samples_dropped(),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            unsupported_values: self.unsupported_values.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded(),
            partition_failures: self.partition_failures(),
            rows_inserted: self.rows_inserted(),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            flushes_size: self.flushes(FlushTrigger::Size),
            flushes_timer: self.flushes(FlushTrigger::Timer),
            flushes_drain: self.flushes(FlushTrigger::Drain),
            flush_failures: self.flush_failures(),
            avg_write_latency_us: self.avg_write_latency_us(),
            uptime: self.uptime(),
            rows_per_second: self.rows_per_second(),
        }
    }

    /// Render the counters in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        };
        counter(
            "tskv_samples_received_total",
            "Samples accepted into the ingestion queue",
            s.samples_received,
        );
        counter(
            "tskv_samples_dropped_total",
            "Samples dropped because the queue was full or closed",
            s.samples_dropped,
        );
        counter(
            "tskv_samples_discarded_total",
            "Samples discarded by workers",
            s.samples_discarded,
        );
        counter(
            "tskv_partition_failures_total",
            "Samples lost to partition creation failures",
            s.partition_failures,
        );
        counter(
            "tskv_rows_inserted_total",
            "Rows inserted into the store",
            s.rows_inserted,
        );
        counter(
            "tskv_flush_failures_total",
            "Bulk inserts that failed",
            s.flush_failures,
        );
        out
    }
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Samples accepted into the queue
    pub samples_received: u64,
    /// Samples dropped under backpressure
    pub samples_dropped: u64,
    /// Undecodable payloads
    pub malformed_payloads: u64,
    /// Skipped values of unsupported type
    pub unsupported_values: u64,
    /// Samples discarded by workers
    pub samples_discarded: u64,
    /// Samples lost to partition failures
    pub partition_failures: u64,
    /// Rows inserted
    pub rows_inserted: u64,
    /// Rows lost to failed inserts
    pub rows_failed: u64,
    /// Size-triggered flushes
    pub flushes_size: u64,
    /// Timer-triggered flushes
    pub flushes_timer: u64,
    /// Drain flushes
    pub flushes_drain: u64,
    /// Failed flushes
    pub flush_failures: u64,
    /// Average insert latency in microseconds
    pub avg_write_latency_us: u64,
    /// Time since metrics collection started
    pub uptime: Duration,
    /// Rows inserted per second
    pub rows_per_second: f64,
}

impl MetricsSnapshot {
    /// Fraction of accepted samples that reached the store (0.0 - 1.0)
    pub fn write_success_rate(&self) -> f64 {
        if self.samples_received > 0 {
            self.rows_inserted as f64 / self.samples_received as f64
        } else {
            1.0
        }
    }

    /// Fraction of offered samples dropped at the queue (0.0 - 1.0)
    pub fn drop_rate(&self) -> f64 {
        let offered = self.samples_received + self.samples_dropped;
        if offered > 0 {
            self.samples_dropped as f64 / offered as f64
        } else {
            0.0
        }
    }
}
