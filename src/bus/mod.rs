//! Message bus integration
//!
//! Devices publish telemetry to a Redis Pub/Sub channel. The subscriber keeps
//! one dedicated connection, hands every message to a
//! [`BusIntake`](crate::ingestion::BusIntake) and reconnects with a fixed
//! delay whenever the connection drops.
//!
//! ```text
//! device ── PUBLISH device:attributes ──▶ Redis ──▶ BusSubscriber ──▶ BusIntake
//! ```

pub mod subscriber;

pub use subscriber::{BusConfig, BusStats, BusSubscriber, Subscription};
