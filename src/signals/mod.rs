pub mod compare;
pub mod hybrid;
pub mod indicators;

use crate::state::Direction;
use std::collections::BTreeMap;

/// Where a model prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Service,
    Local,
}

/// Direction call from the prediction service or the local fallback.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelPrediction {
    pub prediction: Direction,
    /// Probability of the predicted direction, in [0, 1].
    pub confidence: f64,
    pub indicators: BTreeMap<String, f64>,
    pub source: PredictionSource,
}
