//! Bus payload decoding and non-blocking hand-off to the worker queue
//!
//! A device publishes one JSON document per report:
//!
//! ```json
//! {"token": "…", "device_id": "sensor-001", "values": {"temp": 21.5, "on": true}}
//! ```
//!
//! `values` may also arrive as a string holding the same JSON object, either
//! verbatim or base64-encoded. Every key of `values` becomes one [`Sample`]
//! stamped with the decode time.

use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::metrics::IngestionMetrics;
use crate::storage::check_widths;
use crate::types::{Sample, Value};

#[derive(Debug, Deserialize)]
struct DevicePayload {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    values: serde_json::Value,
}

/// Result of handling one payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeOutcome {
    /// Samples placed on the queue
    pub accepted: usize,
    /// Samples lost because the queue was full or closed
    pub dropped: usize,
    /// Values skipped because their type or width is not storable
    pub skipped: usize,
}

/// Decodes bus payloads and offers samples to the worker queue
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Clone)]
pub struct BusIntake {
    sender: mpsc::Sender<Sample>,
    metrics: Arc<IngestionMetrics>,
}

impl BusIntake {
    /// Create an intake feeding `sender`
    pub fn new(sender: mpsc::Sender<Sample>, metrics: Arc<IngestionMetrics>) -> Self {
        Self { sender, metrics }
    }

    /// Decode a raw payload and enqueue its samples without blocking
    ///
    /// Malformed payloads and payloads without a device id are logged and
    /// dropped whole; nothing is ever returned as an error to the bus.
    pub fn handle_payload(&self, payload: &[u8]) -> IntakeOutcome {
        let decoded: DevicePayload = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to decode bus payload");
                self.metrics.record_malformed();
                return IntakeOutcome::default();
            },
        };

        if decoded.device_id.is_empty() {
            warn!("Bus payload without device_id, dropped");
            self.metrics.record_malformed();
            return IntakeOutcome::default();
        }

        let values = match decode_values(decoded.values) {
            Some(values) => values,
            None => {
                warn!(device_id = %decoded.device_id, "Bus payload values are not a JSON object");
                self.metrics.record_malformed();
                return IntakeOutcome::default();
            },
        };

        let mut outcome = IntakeOutcome::default();
        for (key, raw) in values {
            let value = match Value::from_json(&raw) {
                Ok(v) => v,
                Err(e) => {
                    debug!(device_id = %decoded.device_id, key = %key, error = %e, "Skipping value");
                    self.metrics.record_unsupported();
                    outcome.skipped += 1;
                    continue;
                },
            };

            let mut sample = Sample::now(decoded.device_id.clone(), key, value);
            if let Some(tenant) = decoded.tenant_id.as_deref().filter(|t| !t.is_empty()) {
                sample = sample.with_tenant(tenant);
            }
            if let Err(e) = check_widths(&sample) {
                warn!(
                    device_id = %sample.device_id,
                    key = %sample.key,
                    error = %e,
                    "Sample does not fit the schema, skipped"
                );
                self.metrics.record_unsupported();
                outcome.skipped += 1;
                continue;
            }

            if self.offer(sample) {
                outcome.accepted += 1;
            } else {
                outcome.dropped += 1;
            }
        }
        outcome
    }

    /// Try to enqueue one sample; never waits for capacity
    pub fn offer(&self, sample: Sample) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => {
                self.metrics.record_received(1);
                true
            },
            Err(TrySendError::Full(sample)) => {
                warn!(
                    device_id = %sample.device_id,
                    key = %sample.key,
                    "Ingestion queue full, sample dropped"
                );
                self.metrics.record_dropped(1);
                false
            },
            Err(TrySendError::Closed(sample)) => {
                warn!(
                    device_id = %sample.device_id,
                    key = %sample.key,
                    "Ingestion queue closed, sample dropped"
                );
                self.metrics.record_dropped(1);
                false
            },
        }
    }
}

/// Accept `values` as an object, a JSON string, or base64 of a JSON string
fn decode_values(raw: serde_json::Value) -> Option<serde_json::Map<String, serde_json::Value>> {
    match raw {
        serde_json::Value::Object(map) => Some(map),
        serde_json::Value::String(text) => {
            let bytes = if text.trim_start().starts_with('{') {
                text.into_bytes()
            } else {
                base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .ok()?
            };
            match serde_json::from_slice(&bytes).ok()? {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(capacity: usize) -> (BusIntake, mpsc::Receiver<Sample>, Arc<IngestionMetrics>) {
        let (tx, rx) = mpsc::channel(capacity);
        let metrics = Arc::new(IngestionMetrics::new());
        (BusIntake::new(tx, metrics.clone()), rx, metrics)
    }

    #[test]
    fn test_object_values() {
        let (intake, mut rx, metrics) = intake(16);
        let outcome = intake.handle_payload(
            br#"{"token":"t","device_id":"sensor-1","values":{"temp":21.5,"on":true,"mode":"eco"}}"#,
        );
        assert_eq!(outcome.accepted, 3);
        assert_eq!(metrics.samples_received(), 3);

        let mut keys = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            assert_eq!(sample.device_id, "sensor-1");
            keys.push(sample.key);
        }
        keys.sort();
        assert_eq!(keys, vec!["mode", "on", "temp"]);
    }

    #[test]
    fn test_string_and_base64_values() {
        let (intake, _rx, _) = intake(16);
        let outcome =
            intake.handle_payload(br#"{"device_id":"d-1","values":"{\"a\":1,\"b\":\"x\"}"}"#);
        assert_eq!(outcome.accepted, 2);

        let encoded = base64::engine::general_purpose::STANDARD.encode(br#"{"a":1}"#);
        let payload = format!(r#"{{"device_id":"d-1","values":"{}"}}"#, encoded);
        assert_eq!(intake.handle_payload(payload.as_bytes()).accepted, 1);
    }

    #[test]
    fn test_tenant_is_attached() {
        let (intake, mut rx, _) = intake(16);
        intake.handle_payload(br#"{"device_id":"d-1","tenant_id":"acme","values":{"a":1}}"#);
        let sample = rx.try_recv().unwrap();
        assert_eq!(sample.tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_unsupported_values_skipped() {
        let (intake, _rx, _) = intake(16);
        let outcome = intake
            .handle_payload(br#"{"device_id":"d-1","values":{"a":1,"b":null,"c":[1],"d":{"x":1}}}"#);
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.skipped, 3);
    }

    #[test]
    fn test_oversize_values_skipped_alone() {
        let (intake, mut rx, metrics) = intake(16);
        let payload = format!(
            r#"{{"device_id":"d-1","values":{{"s":"{}","t":1,"{}":true}}}}"#,
            "x".repeat(300),
            "k".repeat(65)
        );
        let outcome = intake.handle_payload(payload.as_bytes());
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(metrics.snapshot().unsupported_values, 2);
        assert_eq!(rx.try_recv().unwrap().key, "t");

        // exactly at the column width is fine
        let payload = format!(r#"{{"device_id":"d-1","values":{{"s":"{}"}}}}"#, "é".repeat(256));
        assert_eq!(intake.handle_payload(payload.as_bytes()).accepted, 1);
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        let (intake, _rx, metrics) = intake(16);
        assert_eq!(intake.handle_payload(b"not json"), IntakeOutcome::default());
        assert_eq!(
            intake.handle_payload(br#"{"values":{"a":1}}"#),
            IntakeOutcome::default()
        );
        assert_eq!(
            intake.handle_payload(br#"{"device_id":"d","values":[1,2]}"#),
            IntakeOutcome::default()
        );
        assert_eq!(metrics.snapshot().malformed_payloads, 3);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (intake, _rx, metrics) = intake(2);
        let outcome =
            intake.handle_payload(br#"{"device_id":"d-1","values":{"a":1,"b":2,"c":3,"d":4}}"#);
        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(metrics.samples_dropped(), 2);
    }

    #[test]
    fn test_closed_queue_drops() {
        let (intake, rx, metrics) = intake(2);
        drop(rx);
        assert!(!intake.offer(Sample::now("d-1", "a", Value::Bool(true))));
        assert_eq!(metrics.samples_dropped(), 1);
    }
}
