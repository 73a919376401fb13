//! Redis Pub/Sub subscriber feeding the ingestion queue

use futures::StreamExt;
use redis::{Client, RedisError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ingestion::BusIntake;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the bus subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Whether the gateway subscribes to the bus at all
    pub enabled: bool,
    /// Redis URL
    pub redis_url: String,
    /// Channel name; a name containing `*` is subscribed as a pattern
    pub channel: String,
    /// Delay between reconnection attempts, in seconds
    pub reconnect_delay_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "device:attributes".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

impl BusConfig {
    /// Create config with Redis URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            redis_url: url.into(),
            ..Default::default()
        }
    }

    /// How the configured channel is subscribed
    pub fn subscription(&self) -> Subscription {
        Subscription::from_name(&self.channel)
    }

    /// Reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.is_empty() {
            return Err("bus.redis_url must not be empty".to_string());
        }
        if self.channel.is_empty() {
            return Err("bus.channel must not be empty".to_string());
        }
        if self.reconnect_delay_secs == 0 {
            return Err("bus.reconnect_delay_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// A plain channel or a glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// `SUBSCRIBE <name>`
    Channel(String),
    /// `PSUBSCRIBE <pattern>`
    Pattern(String),
}

impl Subscription {
    /// Pattern when the name contains `*`, plain channel otherwise
    pub fn from_name(name: &str) -> Self {
        if name.contains('*') {
            Subscription::Pattern(name.to_string())
        } else {
            Subscription::Channel(name.to_string())
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Statistics for the subscriber
#[derive(Default)]
pub struct BusStats {
    /// Messages received from the bus
    pub messages: AtomicU64,
    /// Samples accepted by the intake
    pub samples: AtomicU64,
    /// Number of reconnection attempts
    pub reconnects: AtomicU64,
}

/// Subscribes to the device channel and feeds every message to the intake
///
/// Run [`BusSubscriber::run`] in a background task.
pub struct BusSubscriber {
    config: BusConfig,
    intake: BusIntake,
    stats: Arc<BusStats>,
}

impl BusSubscriber {
    /// Create a new subscriber
    pub fn new(config: BusConfig, intake: BusIntake) -> Self {
        Self {
            config,
            intake,
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    /// Run the subscription loop until `shutdown` fires
    ///
    /// Connection failures never end the loop: after a fixed delay the
    /// subscriber reconnects and resubscribes, indefinitely.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = self.connect_and_listen() => match result {
                    Ok(()) => warn!(channel = %self.config.channel, "Bus stream ended"),
                    Err(e) => warn!(error = %e, channel = %self.config.channel, "Bus connection lost"),
                },
                _ = shutdown.recv() => {
                    info!("Bus subscriber shutting down");
                    return;
                },
            }

            let attempt = self.stats.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                attempt,
                delay_secs = self.config.reconnect_delay_secs,
                "Reconnecting to bus"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {},
                _ = shutdown.recv() => {
                    info!("Bus subscriber shutting down");
                    return;
                },
            }
        }
    }

    /// Connect, subscribe and pump messages until the stream ends
    #[allow(deprecated)] // a dedicated connection is required for Pub/Sub
    async fn connect_and_listen(&self) -> Result<(), RedisError> {
        let client = Client::open(self.config.redis_url.as_str())?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();

        match self.config.subscription() {
            Subscription::Channel(name) => pubsub.subscribe(&name).await?,
            Subscription::Pattern(pattern) => pubsub.psubscribe(&pattern).await?,
        }
        info!(channel = %self.config.channel, "Bus subscriber connected and listening");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            self.stats.messages.fetch_add(1, Ordering::Relaxed);
            let outcome = self.intake.handle_payload(msg.get_payload_bytes());
            self.stats
                .samples
                .fetch_add(outcome.accepted as u64, Ordering::Relaxed);
            debug!(
                channel = msg.get_channel_name(),
                accepted = outcome.accepted,
                dropped = outcome.dropped,
                skipped = outcome.skipped,
                "Bus message handled"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::IngestionMetrics;
    use tokio::sync::mpsc;

    #[test]
    fn test_bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.subscription(),
            Subscription::Channel("device:attributes".to_string())
        );
    }

    #[test]
    fn test_pattern_subscription() {
        assert_eq!(
            Subscription::from_name("device:*:attributes"),
            Subscription::Pattern("device:*:attributes".to_string())
        );
    }

    #[test]
    fn test_bus_config_validation() {
        let mut config = BusConfig::with_url("redis://custom:6379");
        assert_eq!(config.redis_url, "redis://custom:6379");
        config.channel.clear();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_while_disconnected() {
        let (tx, _rx) = mpsc::channel(4);
        let intake = BusIntake::new(tx, Arc::new(IngestionMetrics::new()));
        let config = BusConfig {
            // nothing listens on port 1, so every attempt fails fast
            redis_url: "redis://127.0.0.1:1".to_string(),
            reconnect_delay_secs: 60,
            ..Default::default()
        };
        let subscriber = BusSubscriber::new(config, intake);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { subscriber.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
