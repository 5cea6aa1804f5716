//! Deterministic topic and ordering-key assignment.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::envelope::{topics, Envelope};
use crate::error::EventError;
use crate::event::{EnrichedEvent, SourceKind};

/// Maps enriched events to destination topics and ordering keys.
///
/// Topic selection is a fixed function of [`SourceKind`]. Ordering keys:
/// customer interactions key on `customer_id`; other kinds key on
/// `timestamp` when present, falling back to a monotonically increasing
/// sequence number that guarantees a total order within a run.
#[derive(Debug, Default)]
pub struct Router {
    seq: AtomicU64,
}

impl Router {
    /// Creates a router with its sequence counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an [`Envelope`] for the event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Routing`] when the ordering key cannot be
    /// derived (a customer interaction without a string `customer_id`).
    /// Such a failure is fatal to the single event, never to the pipeline.
    pub fn to_envelope(&self, event: EnrichedEvent) -> Result<Envelope, EventError> {
        let topic = match event.kind {
            SourceKind::MarketSignal => topics::MARKET_TRENDS,
            SourceKind::CustomerInteraction => topics::CUSTOMER_BEHAVIOR,
            SourceKind::EcosystemFeedback => topics::ECOSYSTEM_FEEDBACK,
        };

        let key = match event.kind {
            SourceKind::CustomerInteraction => event
                .field("customer_id")
                .map(str::to_owned)
                .ok_or_else(|| EventError::Routing {
                    kind: event.kind,
                    reason: "no 'customer_id' ordering key".into(),
                })?,
            SourceKind::MarketSignal | SourceKind::EcosystemFeedback => {
                match event.field("timestamp") {
                    Some(ts) => ts.to_owned(),
                    None => format!("seq-{}", self.seq.fetch_add(1, Ordering::Relaxed)),
                }
            }
        };

        Ok(Envelope::new(topic, key, event))
    }
}
