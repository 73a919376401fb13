//! Per-worker sample batching
//!
//! A [`SampleBatch`] is owned by exactly one worker. It grows by append and
//! is emptied by [`SampleBatch::take_rows`] when the worker flushes it.

use std::fmt;
use std::time::{Duration, Instant};

use crate::storage::TableRow;
use crate::types::Sample;

/// What caused a batch to be flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// The batch reached `batch_size`
    Size,
    /// The periodic ticker fired, or the batch outlived `batch_wait_time`
    Timer,
    /// The worker is shutting down
    Drain,
}

impl FlushTrigger {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Drain => "drain",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples awaiting a bulk insert, each tagged with its partition
#[derive(Debug, Default)]
pub struct SampleBatch {
    entries: Vec<(String, Sample)>,
    /// Set on the first append after creation or flush
    started_at: Option<Instant>,
    /// Number of flushes this batch has gone through
    sequence: u64,
}

impl SampleBatch {
    /// Create an empty batch with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            started_at: None,
            sequence: 0,
        }
    }

    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time since the first sample of the current batch was appended
    pub fn age(&self) -> Duration {
        self.started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Sequence number of the current batch
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Append a sample destined for `partition`
    pub fn push(&mut self, partition: String, sample: Sample) {
        if self.entries.is_empty() {
            self.started_at = Some(Instant::now());
        }
        self.entries.push((partition, sample));
    }

    /// Which trigger, if any, the batch currently satisfies
    ///
    /// Size wins over age. An empty batch never needs flushing.
    pub fn due(&self, batch_size: usize, wait_time: Duration) -> Option<FlushTrigger> {
        if self.is_empty() {
            None
        } else if self.len() >= batch_size {
            Some(FlushTrigger::Size)
        } else if self.age() >= wait_time {
            Some(FlushTrigger::Timer)
        } else {
            None
        }
    }

    /// Encode every sample into a row and leave the batch empty
    pub fn take_rows(&mut self) -> Vec<TableRow> {
        self.started_at = None;
        self.sequence += 1;
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(partition, sample)| TableRow::new(partition, &sample))
            .collect()
    }
}
