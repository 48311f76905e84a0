//! Historical portfolio value reconstruction.
//!
//! Providers return bars only for trading days, and calendars diverge
//! across instruments (listings, halts). Two tiers:
//!   1. Dates common to every symbol's series: exact valuation per date.
//!   2. No common date: walk the sorted union of dates and forward-fill each
//!      symbol's last close. Before a symbol's first bar its earliest close
//!      is used; a symbol with no bars at all is valued at the lot's buy
//!      price on every date. That last case is a degraded valuation.

use super::round2;
use crate::state::{Holding, PriceSeries};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub total_value: f64,
}

/// Rebuild the daily total value of `holdings`, keeping the most recent `days` points.
pub fn reconstruct_history(
    holdings: &[Holding],
    series_by_symbol: &HashMap<String, PriceSeries>,
    days: usize,
) -> Vec<HistoryPoint> {
    if holdings.is_empty() {
        return Vec::new();
    }

    // Close by date, per distinct symbol. Unknown symbols get an empty map.
    let closes: HashMap<&str, BTreeMap<NaiveDate, f64>> = holdings
        .iter()
        .map(|h| {
            let by_date = series_by_symbol
                .get(&h.symbol)
                .map(|series| series.iter().map(|bar| (bar.date, bar.close)).collect())
                .unwrap_or_default();
            (h.symbol.as_str(), by_date)
        })
        .collect();

    let common = common_dates(&closes);

    let mut points: Vec<HistoryPoint> = if common.is_empty() {
        forward_filled(holdings, &closes)
    } else {
        common
            .into_iter()
            .map(|date| {
                let total: f64 = holdings
                    .iter()
                    .map(|h| h.quantity * closes[h.symbol.as_str()][&date])
                    .sum();
                HistoryPoint { date, total_value: round2(total) }
            })
            .collect()
    };

    if points.len() > days {
        points.drain(..points.len() - days);
    }
    points
}

/// Dates present in every symbol's series.
fn common_dates(closes: &HashMap<&str, BTreeMap<NaiveDate, f64>>) -> BTreeSet<NaiveDate> {
    let mut maps = closes.values();
    let Some(first) = maps.next() else {
        return BTreeSet::new();
    };
    let mut common: BTreeSet<NaiveDate> = first.keys().copied().collect();
    for m in maps {
        common.retain(|d| m.contains_key(d));
    }
    common
}

fn forward_filled(
    holdings: &[Holding],
    closes: &HashMap<&str, BTreeMap<NaiveDate, f64>>,
) -> Vec<HistoryPoint> {
    let union: BTreeSet<NaiveDate> = closes.values().flat_map(|m| m.keys().copied()).collect();

    let mut last_known: HashMap<&str, f64> = HashMap::with_capacity(closes.len());

    union
        .into_iter()
        .map(|date| {
            for (&sym, by_date) in closes {
                if let Some(&close) = by_date.get(&date) {
                    last_known.insert(sym, close);
                }
            }

            let total: f64 = holdings
                .iter()
                .map(|h| {
                    let sym = h.symbol.as_str();
                    let price = last_known
                        .get(sym)
                        .copied()
                        .or_else(|| closes[sym].values().next().copied())
                        .unwrap_or(h.buy_price);
                    h.quantity * price
                })
                .sum();

            HistoryPoint { date, total_value: round2(total) }
        })
        .collect()
}
