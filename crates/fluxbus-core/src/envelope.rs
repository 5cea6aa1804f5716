//! The routed, keyed unit of data ready for publication.

use crate::event::EnrichedEvent;

/// Destination topic names, fixed per source kind.
pub mod topics {
    /// Receives market signal events.
    pub const MARKET_TRENDS: &str = "market_trends";
    /// Receives enriched customer interaction events.
    pub const CUSTOMER_BEHAVIOR: &str = "customer_behavior";
    /// Receives ecosystem feedback events.
    pub const ECOSYSTEM_FEEDBACK: &str = "ecosystem_feedback";
}

/// A routed event bound for a broker topic.
///
/// Envelopes sharing an ordering key are never reordered by the publisher's
/// retry logic. `attempt` starts at zero and is advanced by the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Destination topic.
    pub topic: &'static str,
    /// Ordering key (customer id, timestamp, or router-assigned sequence).
    pub key: String,
    /// The enriched event to serialize and publish.
    pub payload: EnrichedEvent,
    /// Publish attempts made so far.
    pub attempt: u32,
}

impl Envelope {
    /// Creates a fresh envelope with zero attempts.
    #[must_use]
    pub fn new(topic: &'static str, key: String, payload: EnrichedEvent) -> Self {
        Self {
            topic,
            key,
            payload,
            attempt: 0,
        }
    }
}
