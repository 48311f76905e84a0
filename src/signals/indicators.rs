use super::{ModelPrediction, PredictionSource};
use crate::state::{Direction, PriceBar};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

const MA_SHORT: usize = 20;
const MA_LONG: usize = 50;
const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_WINDOW: usize = 20;
const BB_WIDTH: f64 = 2.0;

/// Heuristic probability bounds
const MIN_PROB: f64 = 0.05;
const MAX_PROB: f64 = 0.95;

/// Technical indicator values at the last bar. Windows shrink to the
/// available history when the series is shorter than the nominal window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ma20: f64,
    pub ma50: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

impl IndicatorSnapshot {
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("MA20", self.ma20),
            ("MA50", self.ma50),
            ("RSI", self.rsi),
            ("MACD", self.macd),
            ("MACD_SIGNAL", self.macd_signal),
            ("BB_UPPER", self.bb_upper),
            ("BB_MIDDLE", self.bb_middle),
            ("BB_LOWER", self.bb_lower),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Compute indicators over closes (ascending). `None` for an empty series.
pub fn compute_indicators(closes: &[f64]) -> Option<IndicatorSnapshot> {
    let &close = closes.last()?;

    let ma20 = trailing_mean(closes, MA_SHORT);
    let macd_line: Vec<f64> = ema(closes, MACD_FAST)
        .iter()
        .zip(ema(closes, MACD_SLOW))
        .map(|(fast, slow)| fast - slow)
        .collect();
    let macd_signal = ema(&macd_line, MACD_SIGNAL).last().copied().unwrap_or(0.0);

    let window = &closes[closes.len().saturating_sub(BB_WINDOW)..];
    let std = if window.len() > 1 { window.iter().std_dev() } else { 0.0 };

    Some(IndicatorSnapshot {
        close,
        ma20,
        ma50: trailing_mean(closes, MA_LONG),
        rsi: rsi(closes, RSI_PERIOD),
        macd: macd_line.last().copied().unwrap_or(0.0),
        macd_signal,
        bb_upper: ma20 + BB_WIDTH * std,
        bb_middle: ma20,
        bb_lower: ma20 - BB_WIDTH * std,
    })
}

/// Probability of an up move from momentum and trend votes.
pub fn heuristic_probability(ind: &IndicatorSnapshot) -> f64 {
    let mut score: f64 = 0.5;
    if ind.rsi > 55.0 {
        score += 0.1;
    }
    if ind.rsi < 45.0 {
        score -= 0.1;
    }
    if ind.macd > 0.0 {
        score += 0.1;
    }
    if ind.macd < 0.0 {
        score -= 0.1;
    }
    if ind.ma20 > ind.ma50 {
        score += 0.05;
    }
    if ind.ma20 < ind.ma50 {
        score -= 0.05;
    }
    score.clamp(MIN_PROB, MAX_PROB)
}

/// Local direction call used when the prediction service is unavailable.
pub fn predict_from_series(series: &[PriceBar]) -> ModelPrediction {
    let closes: Vec<f64> = series.iter().map(|b| b.close).filter(|c| c.is_finite()).collect();

    let (proba_up, indicators) = match compute_indicators(&closes) {
        Some(ind) => (heuristic_probability(&ind), ind.to_map()),
        None => (0.5, BTreeMap::new()),
    };

    let prediction = if proba_up >= 0.5 { Direction::Up } else { Direction::Down };
    let confidence = match prediction {
        Direction::Up => proba_up,
        Direction::Down => 1.0 - proba_up,
    };

    ModelPrediction {
        prediction,
        confidence: (confidence * 10_000.0).round() / 10_000.0,
        indicators,
        source: PredictionSource::Local,
    }
}

fn trailing_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(window)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().mean()
}

/// Exponential moving average, seeded with the first value (no bias adjustment).
fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Simple-average RSI over the trailing `period` changes.
fn rsi(closes: &[f64], period: usize) -> f64 {
    let diffs: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let tail = &diffs[diffs.len().saturating_sub(period)..];
    if tail.is_empty() {
        return 50.0;
    }
    let n = tail.len() as f64;
    let gain = tail.iter().filter(|d| **d > 0.0).sum::<f64>() / n;
    let loss = -tail.iter().filter(|d| **d < 0.0).sum::<f64>() / n;

    if loss <= 0.0 {
        return if gain > 0.0 { 100.0 } else { 50.0 };
    }
    100.0 - 100.0 / (1.0 + gain / loss)
}
