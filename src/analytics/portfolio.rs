//! Portfolio analytics over a price snapshot.
//!
//! Pure function of (holdings, prices). Never fails: missing prices count
//! as 0, an empty or zero-valued portfolio degrades to zero allocations.
//!
//! The diversification and risk scores are heuristics, not statistics:
//!   diversification = 0.8 if k > 5 else 0.4 + 0.08k   (k = distinct symbols)
//!   risk            = max(0.1, 1 - min(0.9, max allocation))
//! Risk is pure concentration risk. The max over an empty allocation set
//! is taken as 0, so an empty portfolio reports risk 1.0.

use super::round2;
use crate::state::Holding;
use std::collections::BTreeMap;

const DIVERSIFICATION_BASE: f64 = 0.4;
const DIVERSIFICATION_STEP: f64 = 0.08;
const DIVERSIFICATION_CAP: f64 = 0.8;
const DIVERSIFICATION_CAP_AFTER: usize = 5;

const MAX_CONCENTRATION: f64 = 0.9;
const MIN_RISK: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub total_investment: f64,
    pub current_value: f64,
    pub profit_loss: f64,
    pub by_symbol_values: BTreeMap<String, f64>,
    /// Fractions in [0, 1]; all 0 when current value is 0 or non-finite.
    pub allocation_percentages: BTreeMap<String, f64>,
    pub diversification_score: f64,
    pub risk_score: f64,
}

/// Compute analytics for `holdings`, looking up one price per symbol via `price_of`.
pub fn compute_analytics<F>(holdings: &[Holding], price_of: F) -> AnalyticsResult
where
    F: Fn(&str) -> Option<f64>,
{
    let price = |symbol: &str| price_of(symbol).filter(|p| p.is_finite()).unwrap_or(0.0);

    // Cost basis is summed per lot; value is merged per symbol. Both sums agree
    // regardless of merging, so lots are never combined here.
    let total_investment: f64 = holdings.iter().map(|h| h.quantity * h.buy_price).sum();

    let mut by_symbol_values: BTreeMap<String, f64> = BTreeMap::new();
    let mut current_value: f64 = 0.0;
    for h in holdings {
        let value = h.quantity * price(&h.symbol);
        current_value += value;
        *by_symbol_values.entry(h.symbol.clone()).or_insert(0.0) += value;
    }

    let allocatable = current_value.is_finite() && current_value != 0.0;
    let allocation_percentages: BTreeMap<String, f64> = by_symbol_values
        .iter()
        .map(|(sym, &val)| {
            let share = if allocatable { val / current_value } else { 0.0 };
            (sym.clone(), share)
        })
        .collect();

    let max_allocation = allocation_percentages.values().copied().fold(0.0_f64, f64::max);

    AnalyticsResult {
        total_investment,
        current_value,
        profit_loss: current_value - total_investment,
        diversification_score: diversification_score(by_symbol_values.len()),
        risk_score: risk_score(max_allocation),
        by_symbol_values,
        allocation_percentages,
    }
}

/// Tiered heuristic on the number of distinct symbols.
pub fn diversification_score(distinct_symbols: usize) -> f64 {
    if distinct_symbols > DIVERSIFICATION_CAP_AFTER {
        return DIVERSIFICATION_CAP;
    }
    round2(DIVERSIFICATION_BASE + DIVERSIFICATION_STEP * distinct_symbols as f64)
}

/// Concentration risk from the largest single-symbol share.
pub fn risk_score(max_allocation: f64) -> f64 {
    round2((1.0 - max_allocation.min(MAX_CONCENTRATION)).max(MIN_RISK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn h(symbol: &str, quantity: f64, buy_price: f64) -> Holding {
        Holding { symbol: symbol.into(), quantity, buy_price }
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[test]
    fn test_two_symbol_example() {
        let holdings = vec![h("AAPL", 10.0, 100.0), h("MSFT", 5.0, 200.0)];
        let px = prices(&[("AAPL", 150.0), ("MSFT", 180.0)]);
        let r = compute_analytics(&holdings, |s| px.get(s).copied());

        assert_eq!(r.total_investment, 2000.0);
        assert_eq!(r.current_value, 2400.0);
        assert_eq!(r.profit_loss, 400.0);
        assert_eq!(r.by_symbol_values["AAPL"], 1500.0);
        assert_eq!(r.by_symbol_values["MSFT"], 900.0);
        assert!((r.allocation_percentages["AAPL"] - 0.625).abs() < 1e-12);
        assert!((r.allocation_percentages["MSFT"] - 0.375).abs() < 1e-12);
        assert_eq!(r.diversification_score, 0.56);
        assert_eq!(r.risk_score, 0.38);
    }

    #[test]
    fn test_empty_portfolio() {
        let r = compute_analytics(&[], |_| None);
        assert_eq!(r.total_investment, 0.0);
        assert_eq!(r.current_value, 0.0);
        assert_eq!(r.profit_loss, 0.0);
        assert!(r.allocation_percentages.is_empty());
        assert_eq!(r.diversification_score, 0.4);
        assert_eq!(r.risk_score, 1.0);
    }

    #[test]
    fn test_missing_price_counts_as_zero() {
        let holdings = vec![h("AAPL", 10.0, 100.0), h("GONE", 3.0, 50.0)];
        let px = prices(&[("AAPL", 120.0)]);
        let r = compute_analytics(&holdings, |s| px.get(s).copied());

        assert_eq!(r.current_value, 1200.0);
        assert_eq!(r.by_symbol_values["GONE"], 0.0);
        assert_eq!(r.allocation_percentages["GONE"], 0.0);
        assert_eq!(r.allocation_percentages["AAPL"], 1.0);
        // Concentration capped at 0.9 => floor of 0.1
        assert_eq!(r.risk_score, 0.1);
    }

    #[test]
    fn test_zero_value_guards_allocation() {
        let holdings = vec![h("AAPL", 10.0, 100.0), h("MSFT", 1.0, 10.0)];
        let r = compute_analytics(&holdings, |_| Some(0.0));
        assert_eq!(r.current_value, 0.0);
        assert!(r.allocation_percentages.values().all(|&v| v == 0.0));
        assert_eq!(r.risk_score, 1.0);
        assert_eq!(r.profit_loss, -1010.0);
    }

    #[test]
    fn test_non_finite_price_is_treated_as_missing() {
        let holdings = vec![h("AAPL", 1.0, 1.0)];
        let r = compute_analytics(&holdings, |_| Some(f64::NAN));
        assert_eq!(r.current_value, 0.0);
        assert_eq!(r.allocation_percentages["AAPL"], 0.0);
    }

    #[test]
    fn test_duplicate_symbols_merge_values() {
        let holdings = vec![h("AAPL", 1.0, 100.0), h("AAPL", 2.0, 130.0), h("MSFT", 1.0, 100.0)];
        let px = prices(&[("AAPL", 100.0), ("MSFT", 100.0)]);
        let r = compute_analytics(&holdings, |s| px.get(s).copied());

        assert_eq!(r.total_investment, 460.0);
        assert_eq!(r.by_symbol_values.len(), 2);
        assert_eq!(r.by_symbol_values["AAPL"], 300.0);
        assert!((r.allocation_percentages["AAPL"] - 0.75).abs() < 1e-12);
        assert_eq!(r.diversification_score, 0.56);
    }

    #[test]
    fn test_allocations_sum_to_one() {
        let holdings: Vec<Holding> = ["A", "B", "C", "D", "E", "F", "G"]
            .iter()
            .enumerate()
            .map(|(i, s)| h(s, (i + 1) as f64, 10.0))
            .collect();
        let r = compute_analytics(&holdings, |s| Some(s.len() as f64 * 7.3));
        let sum: f64 = r.allocation_percentages.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        assert_eq!(r.profit_loss, r.current_value - r.total_investment);
    }

    #[test]
    fn test_diversification_tiers() {
        assert_eq!(diversification_score(0), 0.4);
        assert_eq!(diversification_score(1), 0.48);
        assert_eq!(diversification_score(5), 0.8);
        assert_eq!(diversification_score(6), 0.8);
        assert_eq!(diversification_score(40), 0.8);
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        for k in 1..20 {
            let d = diversification_score(k);
            assert!((0.4..=0.8).contains(&d));
        }
        for i in 0..=100 {
            let r = risk_score(i as f64 / 100.0);
            assert!((0.1..=1.0).contains(&r), "risk {r} at {i}");
        }
    }
}
