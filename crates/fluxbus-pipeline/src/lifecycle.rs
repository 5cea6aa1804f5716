//! Pipeline lifecycle: startup connection establishment and cooperative
//! drain-on-shutdown.

use std::sync::Arc;

use fluxbus_core::{DeliveryOutcome, RawEvent, Scorer};

use crate::broker::Broker;
use crate::config::{ConfigError, PipelineConfig};
use crate::coordinator::Coordinator;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::publisher::Publisher;

/// Errors that prevent the pipeline from starting.
///
/// These are the only pipeline-fatal errors; once running, every failure
/// is per-event and reported through [`DeliveryOutcome`]s.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StartError {
    /// The configuration failed validation.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    /// The broker rejected the connection.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker did not answer within the connect timeout.
    #[error("broker connection timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A running pipeline.
///
/// Obtained from [`PipelineHandle::start`]; consumed by
/// [`PipelineHandle::shutdown`].
pub struct PipelineHandle {
    coordinator: Arc<Coordinator>,
    publisher: Arc<Publisher>,
    broker: Arc<dyn Broker>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
}

impl PipelineHandle {
    /// Validates the configuration, connects the broker within the
    /// configured timeout, and wires the publisher and coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] on invalid configuration or an unreachable
    /// broker; this is the only failure that halts the whole pipeline.
    pub async fn start(
        config: PipelineConfig,
        broker: Arc<dyn Broker>,
        scorer: Option<Arc<dyn Scorer>>,
    ) -> Result<Self, StartError> {
        config.validate()?;

        tokio::time::timeout(config.connect_timeout, broker.connect(&config.brokers))
            .await
            .map_err(|_| StartError::Timeout(config.connect_timeout))?
            .map_err(|err| StartError::Connection(err.to_string()))?;
        tracing::info!(brokers = %config.brokers, "broker connection established");

        let metrics = Arc::new(PipelineMetrics::new());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&broker),
            config.retry.clone(),
            config.lane_capacity,
            config.lane_idle_timeout,
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&publisher),
            scorer,
            Arc::clone(&metrics),
            config.ingest_deadline,
        ));

        tracing::info!("pipeline started");
        Ok(Self {
            coordinator,
            publisher,
            broker,
            metrics,
            config,
        })
    }

    /// Drives one raw event through the pipeline. See
    /// [`Coordinator::ingest`].
    pub async fn ingest(&self, raw: RawEvent) -> DeliveryOutcome {
        self.coordinator.ingest(raw).await
    }

    /// Returns a snapshot of the pipeline counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops accepting events, drains in-flight sends (bounded by the
    /// drain timeout; stragglers are failed with a shutdown error), then
    /// closes the broker connection.
    ///
    /// Always succeeds: individual delivery failures are reported through
    /// their outcomes, not through shutdown.
    pub async fn shutdown(self) {
        tracing::info!(
            drain_timeout_ms = u64::try_from(self.config.drain_timeout.as_millis())
                .unwrap_or(u64::MAX),
            "pipeline shutdown requested"
        );
        self.coordinator.stop_accepting();
        self.publisher.shutdown(self.config.drain_timeout).await;
        if let Err(err) = self.broker.close().await {
            tracing::warn!(error = %err, "broker close failed");
        }
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            acked = snapshot.acked_total,
            failed = snapshot.failed_total,
            "pipeline shut down"
        );
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("brokers", &self.config.brokers)
            .field("in_flight", &self.publisher.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::broker::{BrokerError, BrokerRecord, InMemoryBroker};

    #[tokio::test]
    async fn test_start_connects_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let handle = PipelineHandle::start(
            PipelineConfig::new("localhost:9092"),
            broker.clone(),
            None,
        )
        .await
        .unwrap();

        assert!(broker.is_connected());
        handle.shutdown().await;
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_start_fails_on_unreachable_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.refuse_connections();

        let err = PipelineHandle::start(PipelineConfig::new("nowhere:1"), broker, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::Connection(_)));
    }

    /// Broker whose connect never completes.
    struct UnresponsiveBroker;

    #[async_trait]
    impl crate::broker::Broker for UnresponsiveBroker {
        async fn connect(&self, _brokers: &str) -> Result<(), BrokerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn publish(&self, _record: BrokerRecord<'_>) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_times_out_on_silent_broker() {
        let mut config = PipelineConfig::new("localhost:9092");
        config.connect_timeout = Duration::from_millis(20);

        let err = PipelineHandle::start(config, Arc::new(UnresponsiveBroker), None)
            .await
            .unwrap_err();
        assert_eq!(err, StartError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let err = PipelineHandle::start(
            PipelineConfig::new(""),
            Arc::new(InMemoryBroker::new()),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err, StartError::Config(ConfigError::EmptyBrokers));
    }

    #[tokio::test]
    async fn test_ingest_after_shutdown_signal_is_refused() {
        let broker = Arc::new(InMemoryBroker::new());
        let handle = PipelineHandle::start(
            PipelineConfig::new("localhost:9092"),
            broker.clone(),
            None,
        )
        .await
        .unwrap();

        handle.coordinator.stop_accepting();
        let outcome = handle
            .ingest(fluxbus_core::RawEvent::customer_interaction("C1", "hi"))
            .await;
        assert!(!outcome.is_acked());
        assert_eq!(broker.published_count(), 0);

        handle.shutdown().await;
    }
}
