//! The broker port: fluxbus's view of the external durable log.
//!
//! The pipeline never talks to a concrete broker directly; everything goes
//! through the [`Broker`] trait so reliability logic can be tested against
//! in-process stubs. [`InMemoryBroker`] is the reference stub, with
//! injectable transient failures for retry tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Errors from a broker implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Transient failure (connection reset, broker momentarily
    /// unavailable, queue full). The publisher retries these.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// Permanent failure (message rejected, topic authorization). Fatal to
    /// the event without retry.
    #[error("permanent broker failure: {0}")]
    Permanent(String),

    /// The broker could not be reached. Fatal to pipeline start.
    #[error("broker connection failed: {0}")]
    Connection(String),
}

impl BrokerError {
    /// Whether the publisher should retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One record bound for the broker, borrowed from the in-flight envelope.
#[derive(Debug, Clone, Copy)]
pub struct BrokerRecord<'a> {
    /// Destination topic.
    pub topic: &'a str,
    /// Ordering key; the broker maintains relative order per key.
    pub key: &'a str,
    /// JSON-serialized enriched event.
    pub payload: &'a [u8],
}

/// Connection to an external durable log with per-key ordering.
///
/// `publish` must return only once the broker confirms persistence, not
/// merely buffering. Implementations are shared across per-key lanes, so
/// all methods take `&self`.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Establishes the connection to the broker cluster.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] when the cluster is unreachable.
    async fn connect(&self, brokers: &str) -> Result<(), BrokerError>;

    /// Publishes one record and waits for the persistence acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transient`] for retriable failures and
    /// [`BrokerError::Permanent`] for fatal ones.
    async fn publish(&self, record: BrokerRecord<'_>) -> Result<(), BrokerError>;

    /// Flushes and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if teardown fails; shutdown logs and
    /// continues.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A record as captured by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Destination topic.
    pub topic: String,
    /// Ordering key.
    pub key: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

/// In-process broker stub.
///
/// Records every publish in submission order and can be told to fail the
/// first N publishes with a transient error, which is how the retry and
/// ordering properties are exercised in tests.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    records: Mutex<Vec<PublishedRecord>>,
    fail_next: AtomicU32,
    connected: AtomicBool,
    refuse_connection: AtomicBool,
}

impl InMemoryBroker {
    /// Creates a connected-on-demand stub that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publish calls fail with a transient error.
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Makes `connect` fail, for startup-failure tests.
    pub fn refuse_connections(&self) {
        self.refuse_connection.store(true, Ordering::SeqCst);
    }

    /// Returns all records published so far, in submission order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedRecord> {
        self.records.lock().clone()
    }

    /// Returns how many records were published.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether `connect` has succeeded and `close` has not been called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self, brokers: &str) -> Result<(), BrokerError> {
        if self.refuse_connection.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection(format!(
                "no broker reachable at '{brokers}'"
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, record: BrokerRecord<'_>) -> Result<(), BrokerError> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(BrokerError::Transient("injected failure".into()));
        }
        self.records.lock().push(PublishedRecord {
            topic: record.topic.to_owned(),
            key: record.key.to_owned(),
            payload: record.payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
