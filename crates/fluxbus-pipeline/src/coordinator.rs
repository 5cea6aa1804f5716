//! The orchestration core: validate, enrich, route, publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fluxbus_core::{
    sentiment_from_score, DeliveryOutcome, EnrichedEvent, PipelineError, RawEvent, Router, Scorer,
    SourceKind,
};

use crate::metrics::PipelineMetrics;
use crate::publisher::Publisher;

/// Drives raw events through enrichment, routing, and publication.
///
/// Safe for concurrent invocation: one `ingest` call per incoming event,
/// potentially from independent source collaborators. Every call yields
/// exactly one terminal [`DeliveryOutcome`]; per-event errors are recorded
/// on the outcome and never crash the coordinator.
pub struct Coordinator {
    router: Router,
    scorer: Option<Arc<dyn Scorer>>,
    publisher: Arc<Publisher>,
    metrics: Arc<PipelineMetrics>,
    ingest_deadline: Option<Duration>,
    accepting: AtomicBool,
}

impl Coordinator {
    /// Creates a coordinator over a running publisher.
    #[must_use]
    pub fn new(
        publisher: Arc<Publisher>,
        scorer: Option<Arc<dyn Scorer>>,
        metrics: Arc<PipelineMetrics>,
        ingest_deadline: Option<Duration>,
    ) -> Self {
        Self {
            router: Router::new(),
            scorer,
            publisher,
            metrics,
            ingest_deadline,
            accepting: AtomicBool::new(true),
        }
    }

    /// Stops accepting new events; in-flight sends are unaffected.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Drives one raw event to a terminal [`DeliveryOutcome`].
    ///
    /// Validation failures short-circuit before enrichment or the broker.
    /// Enrichment failures are non-fatal: the event is published with
    /// sentiment unset and the error recorded on the outcome. The caller
    /// blocks for at most the publisher's retry budget, or the configured
    /// ingest deadline if one is set.
    pub async fn ingest(&self, raw: RawEvent) -> DeliveryOutcome {
        self.metrics.ingested_total.fetch_add(1, Ordering::Relaxed);

        if !self.accepting.load(Ordering::Acquire) {
            self.metrics.failed_total.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .shutdown_failures_total
                .fetch_add(1, Ordering::Relaxed);
            return DeliveryOutcome::rejected(PipelineError::Shutdown, raw);
        }

        if let Err(err) = raw.validate() {
            self.metrics
                .validation_errors_total
                .fetch_add(1, Ordering::Relaxed);
            self.metrics.failed_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(kind = %raw.kind, error = %err, "event rejected by validation");
            return DeliveryOutcome::rejected(PipelineError::Validation(err), raw);
        }

        let mut enrichment_error = None;
        let sentiment = match (&self.scorer, raw.kind) {
            (Some(scorer), SourceKind::CustomerInteraction) => {
                let text = raw.field("text").unwrap_or_default();
                match scorer.score(text).await {
                    Ok(score) => Some(sentiment_from_score(score)),
                    Err(err) => {
                        self.metrics
                            .inference_errors_total
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            kind = %raw.kind,
                            error = %err,
                            "enrichment failed, publishing without sentiment"
                        );
                        enrichment_error = Some(err);
                        None
                    }
                }
            }
            _ => None,
        };

        let enriched = EnrichedEvent::new(raw.clone(), sentiment);
        let envelope = match self.router.to_envelope(enriched) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.failed_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %raw.kind, error = %err, "event could not be routed");
                return DeliveryOutcome::rejected(PipelineError::Routing(err), raw)
                    .with_enrichment_error(enrichment_error);
            }
        };

        let outcome = match self.ingest_deadline {
            None => self.publisher.send(envelope, raw, enrichment_error).await,
            Some(deadline) => {
                let topic = envelope.topic;
                let key = envelope.key.clone();
                let fallback_event = raw.clone();
                let fallback_enrichment = enrichment_error.clone();
                let publisher = Arc::clone(&self.publisher);
                let send = tokio::spawn(async move {
                    publisher.send(envelope, raw, enrichment_error).await
                });
                match tokio::time::timeout(deadline, send).await {
                    Ok(Ok(outcome)) => outcome,
                    // Deadline hit: the send keeps running in the background
                    // until its own retry budget is exhausted; its terminal
                    // state is logged and counted by the lane.
                    Ok(Err(_)) | Err(_) => DeliveryOutcome::failed(
                        topic,
                        key,
                        0,
                        PipelineError::Timeout,
                        fallback_event,
                    )
                    .with_enrichment_error(fallback_enrichment),
                }
            }
        };

        match &outcome.error {
            None => tracing::debug!(
                topic = ?outcome.topic,
                key = ?outcome.key,
                attempts = outcome.attempts,
                "event delivered"
            ),
            Some(err) => tracing::warn!(
                topic = ?outcome.topic,
                key = ?outcome.key,
                attempts = outcome.attempts,
                error = %err,
                "event not delivered"
            ),
        }
        outcome
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("accepting", &self.accepting.load(Ordering::Acquire))
            .field("has_scorer", &self.scorer.is_some())
            .field("ingest_deadline", &self.ingest_deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use fluxbus_core::{
        topics, DeliveryStatus, FixedScorer, InferenceError, Sentiment,
    };

    use crate::broker::{Broker, BrokerError, BrokerRecord, InMemoryBroker};
    use crate::config::RetryConfig;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        }
    }

    fn coordinator_with(
        broker: Arc<dyn Broker>,
        scorer: Option<Arc<dyn Scorer>>,
    ) -> (Coordinator, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let publisher = Arc::new(Publisher::new(
            broker,
            fast_retry(),
            64,
            Duration::from_secs(60),
            Arc::clone(&metrics),
        ));
        (
            Coordinator::new(publisher, scorer, Arc::clone(&metrics), None),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_customer_interaction_end_to_end() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, _metrics) =
            coordinator_with(broker.clone(), Some(Arc::new(FixedScorer::new(0.7))));

        let raw = RawEvent::customer_interaction("C1234", "Great product! I love it!");
        let outcome = coordinator.ingest(raw).await;

        assert_eq!(outcome.status, DeliveryStatus::Acked);
        assert_eq!(outcome.topic, Some(topics::CUSTOMER_BEHAVIOR));
        assert_eq!(outcome.key.as_deref(), Some("C1234"));

        let records = broker.published();
        assert_eq!(records.len(), 1);
        let payload: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(payload["customer_id"], "C1234");
        assert_eq!(payload["sentiment"], "positive");
    }

    #[tokio::test]
    async fn test_boundary_score_maps_to_negative() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, _metrics) =
            coordinator_with(broker.clone(), Some(Arc::new(FixedScorer::new(0.5))));

        let outcome = coordinator
            .ingest(RawEvent::customer_interaction("C1", "meh"))
            .await;
        assert!(outcome.is_acked());

        let payload: serde_json::Value =
            serde_json::from_slice(&broker.published()[0].payload).unwrap();
        assert_eq!(payload["sentiment"], Sentiment::Negative.to_string());
    }

    #[tokio::test]
    async fn test_non_customer_events_skip_enrichment() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, _metrics) =
            coordinator_with(broker.clone(), Some(Arc::new(FixedScorer::new(0.9))));

        let outcome = coordinator
            .ingest(RawEvent::market_signal("2023-10-05T12:00:00", "Tech", "Up"))
            .await;
        assert_eq!(outcome.topic, Some(topics::MARKET_TRENDS));

        let payload: serde_json::Value =
            serde_json::from_slice(&broker.published()[0].payload).unwrap();
        assert!(payload.get("sentiment").is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, metrics) = coordinator_with(broker.clone(), None);

        let mut fields = serde_json::Map::new();
        fields.insert("sector".into(), "Tech".into());
        let raw = RawEvent::new(SourceKind::MarketSignal, fields);

        let outcome = coordinator.ingest(raw).await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::Validation(_))));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(broker.published_count(), 0);
        assert_eq!(metrics.snapshot().validation_errors_total, 1);
    }

    /// Scorer that always reports the model as unavailable.
    struct OfflineScorer;

    #[async_trait]
    impl Scorer for OfflineScorer {
        async fn score(&self, _text: &str) -> Result<f64, InferenceError> {
            Err(InferenceError::Unavailable("model offline".into()))
        }
    }

    #[tokio::test]
    async fn test_enrichment_failure_is_non_fatal() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, metrics) = coordinator_with(broker.clone(), Some(Arc::new(OfflineScorer)));

        let outcome = coordinator
            .ingest(RawEvent::customer_interaction("C1", "hi"))
            .await;

        // Published anyway, sentiment unset, error recorded on the outcome.
        assert!(outcome.is_acked());
        assert!(matches!(
            outcome.enrichment_error,
            Some(InferenceError::Unavailable(_))
        ));
        let payload: serde_json::Value =
            serde_json::from_slice(&broker.published()[0].payload).unwrap();
        assert!(payload.get("sentiment").is_none());
        assert_eq!(metrics.snapshot().inference_errors_total, 1);
    }

    #[tokio::test]
    async fn test_ingest_after_stop_accepting() {
        let broker = Arc::new(InMemoryBroker::new());
        let (coordinator, _metrics) = coordinator_with(broker.clone(), None);
        coordinator.stop_accepting();

        let outcome = coordinator
            .ingest(RawEvent::customer_interaction("C1", "hi"))
            .await;
        assert_eq!(outcome.error, Some(PipelineError::Shutdown));
        assert_eq!(broker.published_count(), 0);
    }

    /// Broker that never acks, to exercise the caller deadline.
    struct StalledBroker;

    #[async_trait]
    impl Broker for StalledBroker {
        async fn connect(&self, _brokers: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, _record: BrokerRecord<'_>) -> Result<(), BrokerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingest_deadline_yields_timeout_outcome() {
        let metrics = Arc::new(PipelineMetrics::new());
        let publisher = Arc::new(Publisher::new(
            Arc::new(StalledBroker),
            fast_retry(),
            64,
            Duration::from_secs(60),
            Arc::clone(&metrics),
        ));
        let coordinator = Coordinator::new(
            publisher,
            None,
            metrics,
            Some(Duration::from_millis(20)),
        );

        let outcome = coordinator
            .ingest(RawEvent::customer_interaction("C1", "hi"))
            .await;
        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.error, Some(PipelineError::Timeout));
        assert_eq!(outcome.topic, Some(topics::CUSTOMER_BEHAVIOR));
    }
}
