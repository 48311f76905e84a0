use super::types::{DailySeriesResponse, GlobalQuoteResponse};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::state::{PriceBar, PriceSeries};
use chrono::{NaiveDate, Utc};
use portable_atomic::{AtomicU64, Ordering};
use reqwest::Client;
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::time::Duration;

const QUOTE_TIMEOUT: Duration = Duration::from_secs(8);
const SERIES_TIMEOUT: Duration = Duration::from_secs(10);

/// Alpha Vantage client. Every public lookup falls back to the deterministic
/// mock when no key is configured or the provider fails.
pub struct MarketDataClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    pub fallbacks: AtomicU64,
}

impl MarketDataClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: config.alpha_vantage_base_url.trim_end_matches('/').to_string(),
            api_key: config.alpha_vantage_api_key.clone(),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Latest price for `symbol`.
    pub async fn current_price(&self, symbol: &str) -> f64 {
        let Some(key) = self.api_key.as_deref() else {
            return mock_price(symbol);
        };
        match self.fetch_quote(key, symbol).await {
            Ok(price) => price,
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "quote fetch failed, using mock price");
                mock_price(symbol)
            }
        }
    }

    /// Most recent `days` daily bars, ascending.
    pub async fn daily_series(&self, symbol: &str, days: usize) -> PriceSeries {
        let today = Utc::now().date_naive();
        let Some(key) = self.api_key.as_deref() else {
            return mock_daily_series(symbol, days, today);
        };
        match self.fetch_series(key, symbol).await {
            Ok(mut series) if !series.is_empty() => {
                if series.len() > days {
                    series.drain(..series.len() - days);
                }
                series
            }
            Ok(_) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, "empty daily series, using mock series");
                mock_daily_series(symbol, days, today)
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "series fetch failed, using mock series");
                mock_daily_series(symbol, days, today)
            }
        }
    }

    /// (previous close, last close).
    pub async fn last_two_closes(&self, symbol: &str) -> (f64, f64) {
        let Some(key) = self.api_key.as_deref() else {
            return mock_last_two_closes(symbol);
        };
        match self.fetch_series(key, symbol).await {
            Ok(series) if series.len() >= 2 => {
                let n = series.len();
                (series[n - 2].close, series[n - 1].close)
            }
            Ok(_) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                mock_last_two_closes(symbol)
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "closes fetch failed, using mock closes");
                mock_last_two_closes(symbol)
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> AppResult<T> {
        let url = format!("{}/query", self.base_url);
        let resp = self.client.get(&url).query(params).timeout(timeout).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), body });
        }

        resp.json::<T>().await.map_err(|e| AppError::Parse(format!("market data: {e}")))
    }

    async fn fetch_quote(&self, key: &str, symbol: &str) -> AppResult<f64> {
        let params: SmallVec<[(&str, &str); 3]> =
            smallvec::smallvec![("function", "GLOBAL_QUOTE"), ("symbol", symbol), ("apikey", key)];
        let data: GlobalQuoteResponse = self.get_json(&params, QUOTE_TIMEOUT).await?;
        quote_price(data, symbol)
    }

    async fn fetch_series(&self, key: &str, symbol: &str) -> AppResult<PriceSeries> {
        let params: SmallVec<[(&str, &str); 3]> =
            smallvec::smallvec![("function", "TIME_SERIES_DAILY"), ("symbol", symbol), ("apikey", key)];
        let data: DailySeriesResponse = self.get_json(&params, SERIES_TIMEOUT).await?;
        series_from_payload(data)
    }
}

/// Positive finite price from a GLOBAL_QUOTE reply.
fn quote_price(data: GlobalQuoteResponse, symbol: &str) -> AppResult<f64> {
    let price_str = data
        .global_quote
        .and_then(|q| q.price)
        .ok_or_else(|| AppError::Parse(format!("no quote for {symbol}")))?;

    let price: f64 = price_str
        .trim()
        .parse()
        .map_err(|_| AppError::Parse(format!("invalid price string: {price_str}")))?;

    if price <= 0.0 || !price.is_finite() {
        return Err(AppError::Parse(format!("invalid price: {price}")));
    }
    Ok(price)
}

/// Ascending bars from a TIME_SERIES_DAILY reply. Rows with an unparsable
/// date or close are skipped; other unparsable fields take the close.
fn series_from_payload(data: DailySeriesResponse) -> AppResult<PriceSeries> {
    let Some(time_series) = data.time_series else {
        let reason = data.note.or(data.information).unwrap_or_else(|| "no time series".into());
        return Err(AppError::Upstream { status: 200, body: reason });
    };

    // BTreeMap over ISO dates is already ascending
    Ok(time_series
        .iter()
        .filter_map(|(date, bar)| {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
            let close: f64 = bar.close.trim().parse().ok()?;
            let num = |s: &str| s.trim().parse::<f64>().unwrap_or(close);
            Some(PriceBar {
                date,
                open: num(bar.open.as_str()),
                high: num(bar.high.as_str()),
                low: num(bar.low.as_str()),
                close,
            })
        })
        .collect())
}

// ── Deterministic fallbacks: seeded only by their arguments ──

/// Pseudo-price in [5, 150) derived from a SHA-256 of the symbol.
pub fn mock_price(symbol: &str) -> f64 {
    let digest = Sha256::digest(symbol.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(head);
    5.0 + (n % 14_500) as f64 / 100.0
}

/// `days` consecutive calendar days ending at `end`, gently trending around the mock price.
pub fn mock_daily_series(symbol: &str, days: usize, end: NaiveDate) -> PriceSeries {
    let base = mock_price(symbol);
    (0..days)
        .map(|i| {
            let offset = (days - 1 - i) as i64;
            let x = i as f64;
            let price = base + 0.5 * x + 2.0 * (x / 3.0).sin();
            PriceBar {
                date: end - chrono::Duration::days(offset),
                open: price - 1.0,
                high: price + 1.0,
                low: price - 1.0,
                close: price,
            }
        })
        .collect()
}

pub fn mock_last_two_closes(symbol: &str) -> (f64, f64) {
    let p = mock_price(symbol);
    (p * 0.98, p)
}
