//! Hybrid signal: model confidence blended with news sentiment.
//!
//! score = 0.7 * confidence + 0.3 * (sentiment + 1) / 2
//!
//! Confidence is clamped to [0, 1] and sentiment to [-1, 1] first, so the
//! score always lands in [0, 1]. Ties at 0.5 resolve to UP.

use crate::state::Direction;

const MODEL_WEIGHT: f64 = 0.7;
const SENTIMENT_WEIGHT: f64 = 0.3;
const UP_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResult {
    pub hybrid_score: f64,
    pub dominant_signal: Direction,
}

/// Pure function. Non-finite inputs are read as 0.
#[inline]
pub fn blend(model_confidence: f64, sentiment_score: f64) -> HybridResult {
    let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
    let confidence = finite_or_zero(model_confidence).clamp(0.0, 1.0);
    let sentiment = finite_or_zero(sentiment_score).clamp(-1.0, 1.0);

    let normalized_sentiment = (sentiment + 1.0) / 2.0;
    let score = MODEL_WEIGHT * confidence + SENTIMENT_WEIGHT * normalized_sentiment;

    HybridResult {
        hybrid_score: score,
        dominant_signal: if score >= UP_THRESHOLD { Direction::Up } else { Direction::Down },
    }
}
