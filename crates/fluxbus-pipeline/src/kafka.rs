//! Kafka implementation of the [`Broker`] port over rdkafka.
//!
//! The producer runs with idempotence enabled and `acks=all`, so a
//! successful delivery report means the record is persisted on all in-sync
//! replicas, which is what [`Broker::publish`] promises.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;

use crate::broker::{Broker, BrokerError, BrokerRecord};

/// Default upper bound on a single delivery report.
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Kafka-backed broker.
///
/// Created unconnected; [`Broker::connect`] builds the producer and proves
/// reachability with a metadata fetch.
pub struct KafkaBroker {
    delivery_timeout: Duration,
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaBroker {
    /// Creates an unconnected Kafka broker.
    #[must_use]
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            delivery_timeout,
            producer: Mutex::new(None),
        }
    }

    /// Builds the rdkafka producer configuration.
    fn client_config(&self, brokers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                self.delivery_timeout.as_millis().to_string(),
            );
        config
    }

    fn current_producer(&self) -> Result<FutureProducer, BrokerError> {
        self.producer
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::Connection("kafka producer not connected".into()))
    }
}

impl Default for KafkaBroker {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_TIMEOUT)
    }
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("delivery_timeout", &self.delivery_timeout)
            .field("connected", &self.producer.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn connect(&self, brokers: &str) -> Result<(), BrokerError> {
        let producer: FutureProducer = self
            .client_config(brokers)
            .create()
            .map_err(|err| BrokerError::Connection(err.to_string()))?;

        // Metadata fetch proves the cluster is actually reachable; rdkafka
        // producer creation alone succeeds even against a dead address.
        let probe = producer.clone();
        let timeout = self.delivery_timeout;
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|_| ())
        })
        .await
        .map_err(|err| BrokerError::Connection(err.to_string()))?
        .map_err(|err| BrokerError::Connection(err.to_string()))?;

        *self.producer.lock() = Some(producer);
        Ok(())
    }

    async fn publish(&self, record: BrokerRecord<'_>) -> Result<(), BrokerError> {
        let producer = self.current_producer()?;
        let future_record = FutureRecord::to(record.topic)
            .key(record.key)
            .payload(record.payload);

        match producer.send(future_record, Timeout::Never).await {
            Ok(_) => Ok(()),
            Err((err, _unsent)) => Err(classify(&err)),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let Some(producer) = self.producer.lock().take() else {
            return Ok(());
        };
        let timeout = self.delivery_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?
            .map_err(|err| BrokerError::Connection(err.to_string()))
    }
}

/// Splits Kafka errors into retriable and fatal per the publisher's retry
/// policy.
fn classify(err: &KafkaError) -> BrokerError {
    let transient = matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NotEnoughReplicas
                | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
                | RDKafkaErrorCode::NetworkException
        )
    );
    if transient {
        BrokerError::Transient(err.to_string())
    } else {
        BrokerError::Permanent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let broker = KafkaBroker::default();
        let config = broker.client_config("localhost:9092,localhost:9093");

        assert_eq!(
            config.get("bootstrap.servers"),
            Some("localhost:9092,localhost:9093")
        );
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("message.timeout.ms"), Some("30000"));
    }

    #[test]
    fn test_classify_transient() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert!(classify(&err).is_transient());

        let err = KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown);
        assert!(classify(&err).is_transient());
    }

    #[test]
    fn test_classify_permanent() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(!classify(&err).is_transient());

        let err = KafkaError::MessageProduction(RDKafkaErrorCode::TopicAuthorizationFailed);
        assert!(!classify(&err).is_transient());
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let broker = KafkaBroker::default();
        let err = broker
            .publish(BrokerRecord {
                topic: "t",
                key: "k",
                payload: b"p",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Connection(_)));
    }
}
