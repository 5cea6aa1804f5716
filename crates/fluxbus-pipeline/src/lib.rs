//! # Fluxbus Pipeline
//!
//! The runtime half of fluxbus: an at-least-once event publishing pipeline
//! with per-key ordering, bounded retry with exponential backoff, pluggable
//! enrichment, and cooperative drain-on-shutdown.
//!
//! Data flow:
//!
//! ```text
//! source → Coordinator::ingest(raw)
//!            → [optional] Scorer::score()
//!            → Router::to_envelope()
//!            → Publisher::send()   (per-key lane, retry/backoff)
//!            → broker ack
//!            → DeliveryOutcome
//! ```
//!
//! The broker itself is an external durable log behind the [`Broker`]
//! trait; a Kafka implementation is available behind the `kafka` feature.
//!
//! [`Broker`]: broker::Broker

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod lifecycle;
pub mod metrics;
pub mod publisher;

/// Kafka broker implementation over rdkafka.
#[cfg(feature = "kafka")]
pub mod kafka;

pub use broker::{Broker, BrokerError, BrokerRecord, InMemoryBroker};
pub use config::{ConfigError, PipelineConfig, RetryConfig};
pub use coordinator::Coordinator;
pub use lifecycle::{PipelineHandle, StartError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use publisher::Publisher;
