//! # Fluxbus Core
//!
//! Data model and pure logic for the fluxbus event publishing pipeline:
//! typed events with per-kind validation, the routing layer that assigns
//! destination topics and ordering keys, the enrichment port for sentiment
//! scoring, and the error/outcome taxonomy shared with the runtime crate.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod enrich;
pub mod envelope;
pub mod error;
pub mod event;
pub mod outcome;
pub mod router;

pub use enrich::{sentiment_from_score, FixedScorer, InferenceError, Scorer};
pub use envelope::{topics, Envelope};
pub use error::{EventError, PipelineError};
pub use event::{EnrichedEvent, RawEvent, Sentiment, SourceKind};
pub use outcome::{DeliveryOutcome, DeliveryStatus};
pub use router::Router;
