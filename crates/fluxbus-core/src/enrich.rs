//! Enrichment port: the capability interface for sentiment scoring.
//!
//! The pipeline treats scoring as an opaque, possibly expensive external
//! capability. Implementations are injected at startup, which keeps the
//! coordinator decoupled from any specific inference backend and makes
//! deterministic testing trivial via [`FixedScorer`].

use async_trait::async_trait;

use crate::event::Sentiment;

/// Scores strictly above this threshold map to [`Sentiment::Positive`];
/// everything else (the threshold itself included) maps to
/// [`Sentiment::Negative`].
pub const SENTIMENT_THRESHOLD: f64 = 0.5;

/// Errors from the scoring capability.
///
/// Always non-fatal to the event: the coordinator publishes it with
/// sentiment unset and records the error on the outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    /// Scoring was requested for empty text.
    #[error("cannot score empty text")]
    EmptyText,

    /// The underlying model or service is unavailable.
    #[error("scoring model unavailable: {0}")]
    Unavailable(String),

    /// The backend accepted the request but failed to produce a score.
    #[error("scoring backend error: {0}")]
    Backend(String),
}

/// Capability interface wrapping any `text -> score` function.
///
/// Side-effect-free from the pipeline's perspective; may be computationally
/// heavy, hence async.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Scores `text` in `[0.0, 1.0]`-ish space where anything above
    /// [`SENTIMENT_THRESHOLD`] reads as positive.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError`] if the text is empty or the model is
    /// unavailable.
    async fn score(&self, text: &str) -> Result<f64, InferenceError>;
}

/// Maps a raw score to a sentiment label.
#[must_use]
pub fn sentiment_from_score(score: f64) -> Sentiment {
    if score > SENTIMENT_THRESHOLD {
        Sentiment::Positive
    } else {
        Sentiment::Negative
    }
}

/// Scorer returning a fixed score for every non-empty input.
///
/// Used in tests and wiring checks; honors the empty-text contract.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer {
    score: f64,
}

impl FixedScorer {
    /// Creates a scorer that always returns `score`.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self { score }
    }
}

#[async_trait]
impl Scorer for FixedScorer {
    async fn score(&self, text: &str) -> Result<f64, InferenceError> {
        if text.is_empty() {
            return Err(InferenceError::EmptyText);
        }
        Ok(self.score)
    }
}
