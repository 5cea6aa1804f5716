//! Delivery outcomes: error handling as data.
//!
//! Every ingested event yields exactly one terminal [`DeliveryOutcome`],
//! acked or failed; nothing is silently dropped. Failed outcomes carry the
//! original event, the error, and the attempt count so operators can
//! replay them by hand.

use crate::enrich::InferenceError;
use crate::error::PipelineError;
use crate::event::RawEvent;

/// Terminal delivery state of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The broker confirmed persistence.
    Acked,
    /// Terminal failure; see [`DeliveryOutcome::error`].
    Failed,
}

/// The recorded result of driving one event through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// Destination topic, when the event was routed before failing.
    pub topic: Option<&'static str>,
    /// Ordering key, when the event was routed before failing.
    pub key: Option<String>,
    /// Publish attempts made (zero when the broker was never contacted).
    pub attempts: u32,
    /// Terminal state.
    pub status: DeliveryStatus,
    /// The terminal error for failed outcomes.
    pub error: Option<PipelineError>,
    /// A non-fatal enrichment failure, if scoring was attempted and failed.
    /// The event is still published with sentiment unset.
    pub enrichment_error: Option<InferenceError>,
    /// The original event, preserved for manual replay.
    pub event: RawEvent,
}

impl DeliveryOutcome {
    /// Builds an acked outcome for a routed, delivered event.
    #[must_use]
    pub fn acked(topic: &'static str, key: String, attempts: u32, event: RawEvent) -> Self {
        Self {
            topic: Some(topic),
            key: Some(key),
            attempts,
            status: DeliveryStatus::Acked,
            error: None,
            enrichment_error: None,
            event,
        }
    }

    /// Builds a failed outcome for an event rejected before routing.
    #[must_use]
    pub fn rejected(error: PipelineError, event: RawEvent) -> Self {
        Self {
            topic: None,
            key: None,
            attempts: 0,
            status: DeliveryStatus::Failed,
            error: Some(error),
            enrichment_error: None,
            event,
        }
    }

    /// Builds a failed outcome for a routed event whose delivery failed.
    #[must_use]
    pub fn failed(
        topic: &'static str,
        key: String,
        attempts: u32,
        error: PipelineError,
        event: RawEvent,
    ) -> Self {
        Self {
            topic: Some(topic),
            key: Some(key),
            attempts,
            status: DeliveryStatus::Failed,
            error: Some(error),
            enrichment_error: None,
            event,
        }
    }

    /// Attaches a non-fatal enrichment error.
    #[must_use]
    pub fn with_enrichment_error(mut self, error: Option<InferenceError>) -> Self {
        self.enrichment_error = error;
        self
    }

    /// Whether the broker confirmed persistence.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.status == DeliveryStatus::Acked
    }
}
