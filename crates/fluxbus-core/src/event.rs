//! Event types: source kinds, raw events, and enriched events.
//!
//! A [`RawEvent`] is an opaque field map tagged with a [`SourceKind`].
//! Validation checks the per-kind required fields before the event touches
//! enrichment or the broker. An [`EnrichedEvent`] is a raw event plus an
//! optional derived [`Sentiment`]; neither is mutated after creation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// The class of upstream collaborator that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Market feed signals (sector trends).
    MarketSignal,
    /// Customer interaction records, eligible for sentiment enrichment.
    CustomerInteraction,
    /// Ecosystem feedback reports.
    EcosystemFeedback,
}

impl SourceKind {
    /// Returns the wire name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketSignal => "market_signal",
            Self::CustomerInteraction => "customer_interaction",
            Self::EcosystemFeedback => "ecosystem_feedback",
        }
    }

    /// Returns the fields a valid event of this kind must carry.
    #[must_use]
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::MarketSignal => &["timestamp", "sector", "trend"],
            Self::CustomerInteraction => &["customer_id", "text"],
            Self::EcosystemFeedback => &["timestamp", "feedback_type", "message"],
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market_signal" => Ok(Self::MarketSignal),
            "customer_interaction" => Ok(Self::CustomerInteraction),
            "ecosystem_feedback" => Ok(Self::EcosystemFeedback),
            other => Err(format!("unknown source kind: '{other}'")),
        }
    }
}

/// Sentiment label derived for customer interaction events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// Score strictly above the threshold.
    Positive,
    /// Score at or below the threshold.
    Negative,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

/// An event as handed over by an upstream source collaborator.
///
/// The field map is opaque to the pipeline except for the per-kind required
/// fields checked by [`RawEvent::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Which collaborator produced this event.
    pub kind: SourceKind,
    /// Opaque event fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Field names the pipeline writes into the published payload itself; a
/// raw event carrying them would serialize duplicate JSON keys.
const RESERVED_FIELDS: &[&str] = &["kind", "sentiment"];

impl RawEvent {
    /// Creates a raw event from a kind and an arbitrary field map.
    #[must_use]
    pub fn new(kind: SourceKind, fields: Map<String, Value>) -> Self {
        Self { kind, fields }
    }

    /// Builds a market signal event.
    #[must_use]
    pub fn market_signal(timestamp: &str, sector: &str, trend: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("timestamp".into(), Value::String(timestamp.into()));
        fields.insert("sector".into(), Value::String(sector.into()));
        fields.insert("trend".into(), Value::String(trend.into()));
        Self::new(SourceKind::MarketSignal, fields)
    }

    /// Builds a customer interaction event.
    #[must_use]
    pub fn customer_interaction(customer_id: &str, text: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("customer_id".into(), Value::String(customer_id.into()));
        fields.insert("text".into(), Value::String(text.into()));
        Self::new(SourceKind::CustomerInteraction, fields)
    }

    /// Builds an ecosystem feedback event.
    #[must_use]
    pub fn ecosystem_feedback(timestamp: &str, feedback_type: &str, message: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("timestamp".into(), Value::String(timestamp.into()));
        fields.insert("feedback_type".into(), Value::String(feedback_type.into()));
        fields.insert("message".into(), Value::String(message.into()));
        Self::new(SourceKind::EcosystemFeedback, fields)
    }

    /// Returns a field as a string slice, if present and a string.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Checks that every field required for this event's kind is present,
    /// non-empty, and well-formed (`timestamp` must be ISO-8601), and that
    /// no field collides with a name the published payload reserves.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::MissingField`] or [`EventError::InvalidField`].
    pub fn validate(&self) -> Result<(), EventError> {
        for &reserved in RESERVED_FIELDS {
            if self.fields.contains_key(reserved) {
                return Err(EventError::InvalidField {
                    kind: self.kind,
                    field: reserved,
                    reason: "reserved for the published payload".into(),
                });
            }
        }
        for &field in self.kind.required_fields() {
            let value = self.fields.get(field).ok_or(EventError::MissingField {
                kind: self.kind,
                field,
            })?;
            let text = value.as_str().ok_or_else(|| EventError::InvalidField {
                kind: self.kind,
                field,
                reason: "expected a string value".into(),
            })?;
            if text.is_empty() {
                return Err(EventError::InvalidField {
                    kind: self.kind,
                    field,
                    reason: "must not be empty".into(),
                });
            }
            if field == "timestamp" && !is_iso8601(text) {
                return Err(EventError::InvalidField {
                    kind: self.kind,
                    field,
                    reason: format!("'{text}' is not an ISO-8601 timestamp"),
                });
            }
        }
        Ok(())
    }
}

/// Accepts both naive (`2023-10-05T12:00:00`) and offset-carrying
/// (`2023-10-05T12:00:00Z`) timestamps.
fn is_iso8601(text: &str) -> bool {
    text.parse::<chrono::NaiveDateTime>().is_ok()
        || chrono::DateTime::parse_from_rfc3339(text).is_ok()
}

/// A raw event plus its optional derived sentiment label.
///
/// Created by the coordinator after the enrichment step; the JSON payload
/// published to the broker is the serialized form of this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedEvent {
    /// Which collaborator produced the underlying event.
    pub kind: SourceKind,
    /// The original event fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Derived sentiment; only ever set for customer interaction events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

impl EnrichedEvent {
    /// Wraps a raw event with an optional sentiment label.
    #[must_use]
    pub fn new(event: RawEvent, sentiment: Option<Sentiment>) -> Self {
        Self {
            kind: event.kind,
            fields: event.fields,
            sentiment,
        }
    }

    /// Returns a field as a string slice, if present and a string.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
