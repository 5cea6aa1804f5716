//! Error taxonomy for the pipeline.
//!
//! Per-event failures are carried as values inside a
//! [`DeliveryOutcome`](crate::outcome::DeliveryOutcome) rather than raised
//! through the coordinator; only startup connection failures are fatal to
//! the pipeline as a whole (see the runtime crate's lifecycle module).

use crate::enrich::InferenceError;
use crate::event::SourceKind;

/// Errors raised while validating or routing a single event.
///
/// Always fatal to the affected event, never to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// A field required for the event's source kind is absent.
    #[error("{kind} event is missing required field '{field}'")]
    MissingField {
        /// The event's source kind.
        kind: SourceKind,
        /// The absent field.
        field: &'static str,
    },

    /// A required field is present but malformed.
    #[error("{kind} event has invalid field '{field}': {reason}")]
    InvalidField {
        /// The event's source kind.
        kind: SourceKind,
        /// The malformed field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// No ordering key could be derived for the event.
    #[error("cannot route {kind} event: {reason}")]
    Routing {
        /// The event's source kind.
        kind: SourceKind,
        /// Why key derivation failed.
        reason: String,
    },
}

/// Terminal error recorded on a failed [`DeliveryOutcome`].
///
/// [`DeliveryOutcome`]: crate::outcome::DeliveryOutcome
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// The raw event failed per-kind field validation. The broker is never
    /// contacted for such events.
    #[error("validation failed: {0}")]
    Validation(EventError),

    /// The router could not derive an ordering key.
    #[error("routing failed: {0}")]
    Routing(EventError),

    /// Enrichment failed. Non-fatal on its own (the event is still
    /// published with sentiment unset); this variant appears as the
    /// terminal error only if scoring is the sole requested work and the
    /// caller opted to treat it as such.
    #[error("enrichment failed: {0}")]
    Inference(InferenceError),

    /// The retry budget was exhausted, or the broker reported a permanent
    /// failure.
    #[error("delivery failed after {attempts} attempt(s): {last}")]
    Delivery {
        /// How many publish attempts were made.
        attempts: u32,
        /// The last broker error observed.
        last: String,
    },

    /// The pipeline stopped accepting work, or the drain timeout elapsed
    /// with this event still pending.
    #[error("pipeline is shutting down")]
    Shutdown,

    /// The caller's ingest deadline elapsed; the send continues in the
    /// background for logging purposes only.
    #[error("ingest deadline elapsed before delivery completed")]
    Timeout,
}

impl PipelineError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Routing(_) => "routing",
            Self::Inference(_) => "inference",
            Self::Delivery { .. } => "delivery",
            Self::Shutdown => "shutdown",
            Self::Timeout => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_display() {
        let err = EventError::MissingField {
            kind: SourceKind::MarketSignal,
            field: "timestamp",
        };
        assert_eq!(
            err.to_string(),
            "market_signal event is missing required field 'timestamp'"
        );
    }

    #[test]
    fn test_pipeline_error_kinds() {
        let validation = PipelineError::Validation(EventError::MissingField {
            kind: SourceKind::CustomerInteraction,
            field: "text",
        });
        assert_eq!(validation.kind(), "validation");
        assert_eq!(PipelineError::Shutdown.kind(), "shutdown");
        assert_eq!(PipelineError::Timeout.kind(), "timeout");
        assert_eq!(
            PipelineError::Delivery {
                attempts: 5,
                last: "broker unavailable".into()
            }
            .kind(),
            "delivery"
        );
    }

    #[test]
    fn test_delivery_error_display_carries_attempts() {
        let err = PipelineError::Delivery {
            attempts: 5,
            last: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "delivery failed after 5 attempt(s): connection reset"
        );
    }
}
