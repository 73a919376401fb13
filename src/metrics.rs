//! Prometheus metrics for the RPC surface
//!
//! Metrics live in a per-instance [`Registry`] so that several servers (and
//! tests) can coexist in one process. Ingestion counters are kept separately
//! in [`crate::ingestion::IngestionMetrics`] and appended to the exposition.

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// RPC metrics registry
#[derive(Clone)]
pub struct RpcMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
    uptime: Gauge,
    started: Instant,
}

impl RpcMetrics {
    /// Create and register every RPC metric
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("tskv_rpc_requests_total", "Total RPC requests by method and status"),
            &["method", "status"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("tskv_rpc_duration_seconds", "RPC latency in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["method"],
        )?;
        let uptime = Gauge::new("tskv_uptime_seconds", "Server uptime in seconds")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
            uptime,
            started: Instant::now(),
        })
    }

    /// Record one completed call
    #[inline]
    pub fn record_request(&self, method: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.requests.with_label_values(&[method, status]).inc();
        self.duration
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    /// Requests recorded for `method` with the given outcome
    pub fn request_count(&self, method: &str, success: bool) -> u64 {
        let status = if success { "success" } else { "error" };
        self.requests.with_label_values(&[method, status]).get()
    }

    /// Encode the registry in Prometheus text format
    pub fn gather(&self) -> Result<String, String> {
        self.uptime.set(self.started.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;

        String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
    }
}
