use crate::config::AppConfig;
use crate::db::DbPool;
use crate::feeds::llm::LlmClient;
use crate::feeds::market_data::MarketDataClient;
use crate::feeds::ml::MlClient;
use crate::feeds::news::NewsClient;
use crate::server::rate_limit::RateLimiter;
use crate::signals::compare::ComparisonCase;
use crate::store::PortfolioStore;
use chrono::NaiveDate;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Minimum gap between two high-impact alerts for the same symbol.
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(60);

// ── Portfolio ──

/// One lot of a ticker: quantity bought at a price.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub buy_price: f64,
}

impl Holding {
    /// Upper-cased symbol, positive finite quantity and price.
    pub fn normalized(mut self) -> Option<Self> {
        self.symbol = self.symbol.trim().to_uppercase();
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if self.symbol.is_empty() || !positive(self.quantity) || !positive(self.buy_price) {
            return None;
        }
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub user_id: String,
    /// Append-only, in insertion order.
    pub holdings: Vec<Holding>,
}

impl Portfolio {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            holdings: Vec::new(),
        }
    }

    /// Distinct symbols in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for h in &self.holdings {
            if !out.contains(&h.symbol) {
                out.push(h.symbol.clone());
            }
        }
        out
    }
}

// ── Market data ──

/// One trading day for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Ascending by date.
pub type PriceSeries = Vec<PriceBar>;

/// A predicted direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// A realized price move. Sideways is the dead-band around zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MoveDirection {
    Up,
    Down,
    Sideways,
}

impl std::fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertPrediction {
        id: String,
        user_id: Option<String>,
        symbol: String,
        ai_prediction: String,
        ai_confidence: f64,
        user_prediction: String,
        actual: String,
        outcome: String,
        hybrid_score: f64,
        dominant_signal: String,
        created_at: String,
    },
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub requests_served: AtomicU64,
    pub requests_rate_limited: AtomicU64,
    pub predictions_made: AtomicU64,
    pub advisor_replies: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            requests_served: AtomicU64::new(0),
            requests_rate_limited: AtomicU64::new(0),
            predictions_made: AtomicU64::new(0),
            advisor_replies: AtomicU64::new(0),
        }
    }
}

// ── Prediction scoreboard (lock-free) ──

#[derive(Default)]
pub struct Scoreboard {
    sideways: AtomicU64,
    both_correct: AtomicU64,
    ai_correct: AtomicU64,
    user_correct: AtomicU64,
    both_wrong: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardSnapshot {
    pub sideways: u64,
    pub both_correct: u64,
    pub ai_correct: u64,
    pub user_correct: u64,
    pub both_wrong: u64,
    /// Rounds with a directional outcome.
    pub scored: u64,
    pub ai_accuracy: f64,
    pub user_accuracy: f64,
}

impl Scoreboard {
    pub fn record(&self, case: ComparisonCase) {
        let counter = match case {
            ComparisonCase::Sideways => &self.sideways,
            ComparisonCase::BothCorrect => &self.both_correct,
            ComparisonCase::AiCorrect => &self.ai_correct,
            ComparisonCase::UserCorrect => &self.user_correct,
            ComparisonCase::BothWrong => &self.both_wrong,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScoreboardSnapshot {
        use Ordering::Relaxed;
        let both_correct = self.both_correct.load(Relaxed);
        let ai_correct = self.ai_correct.load(Relaxed);
        let user_correct = self.user_correct.load(Relaxed);
        let both_wrong = self.both_wrong.load(Relaxed);
        let scored = both_correct + ai_correct + user_correct + both_wrong;
        let rate = |hits: u64| {
            if scored == 0 {
                0.0
            } else {
                crate::analytics::round2(hits as f64 / scored as f64)
            }
        };
        ScoreboardSnapshot {
            sideways: self.sideways.load(Relaxed),
            both_correct,
            ai_correct,
            user_correct,
            both_wrong,
            scored,
            ai_accuracy: rate(both_correct + ai_correct),
            user_accuracy: rate(both_correct + user_correct),
        }
    }
}

// ── Application shared state ──

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn PortfolioStore>,

    // Read side of the prediction log; `None` when running without SQLite
    pub db: Option<DbPool>,
    // Handler -> DB Writer: bounded command channel
    pub db_tx: Option<mpsc::Sender<DbCommand>>,

    pub market: MarketDataClient,
    pub news: NewsClient,
    pub llm: LlmClient,
    pub ml: MlClient,

    pub limiter: RateLimiter,
    alert_cooldowns: Mutex<HashMap<String, Instant>>,

    pub counters: PerfCounters,
    pub scoreboard: Scoreboard,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PortfolioStore>,
        db: Option<DbPool>,
        db_tx: Option<mpsc::Sender<DbCommand>>,
    ) -> Arc<Self> {
        let limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit_window_secs),
            config.rate_limit_max,
        );

        Arc::new(Self {
            market: MarketDataClient::new(&config),
            news: NewsClient::new(&config),
            llm: LlmClient::new(&config),
            ml: MlClient::new(&config),
            limiter,
            alert_cooldowns: Mutex::new(HashMap::new()),
            config,
            store,
            db,
            db_tx,
            counters: PerfCounters::new(),
            scoreboard: Scoreboard::default(),
        })
    }

    /// Returns true (and starts a new cooldown) when `symbol` has not
    /// alerted within `ALERT_COOLDOWN` of `now`.
    pub fn claim_alert(&self, symbol: &str, now: Instant) -> bool {
        let Ok(mut map) = self.alert_cooldowns.lock() else {
            return false;
        };
        match map.get(symbol) {
            Some(last) if now.saturating_duration_since(*last) <= ALERT_COOLDOWN => false,
            _ => {
                map.retain(|_, last| now.saturating_duration_since(*last) <= ALERT_COOLDOWN);
                map.insert(symbol.to_string(), now);
                true
            }
        }
    }

    /// Provider lookups that fell back to a deterministic mock after a failure.
    pub fn provider_fallbacks(&self) -> u64 {
        self.market.fallbacks.load(Ordering::Relaxed)
            + self.news.fallbacks.load(Ordering::Relaxed)
            + self.llm.fallbacks.load(Ordering::Relaxed)
            + self.ml.fallbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_holding_normalization() {
        let h = Holding { symbol: " aapl ".into(), quantity: 2.0, buy_price: 10.0 };
        assert_eq!(h.normalized().map(|h| h.symbol), Some("AAPL".to_string()));

        let bad = Holding { symbol: "MSFT".into(), quantity: 0.0, buy_price: 10.0 };
        assert!(bad.normalized().is_none());

        let blank = Holding { symbol: "  ".into(), quantity: 1.0, buy_price: 10.0 };
        assert!(blank.normalized().is_none());

        let nan = Holding { symbol: "X".into(), quantity: 1.0, buy_price: f64::NAN };
        assert!(nan.normalized().is_none());
    }

    #[test]
    fn test_portfolio_symbols_dedup_in_order() {
        let mut p = Portfolio::empty("u1");
        for s in ["MSFT", "AAPL", "MSFT"] {
            p.holdings.push(Holding { symbol: s.into(), quantity: 1.0, buy_price: 1.0 });
        }
        assert_eq!(p.symbols(), vec!["MSFT".to_string(), "AAPL".to_string()]);
    }

    #[test]
    fn test_direction_wire_format() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"UP\"");
        assert_eq!(serde_json::to_string(&MoveDirection::Sideways).unwrap(), "\"SIDEWAYS\"");
        let d: Direction = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(d, Direction::Down);
    }

    #[test]
    fn test_scoreboard_accuracy_ignores_sideways() {
        let board = Scoreboard::default();
        board.record(ComparisonCase::Sideways);
        board.record(ComparisonCase::BothCorrect);
        board.record(ComparisonCase::AiCorrect);
        board.record(ComparisonCase::UserCorrect);
        board.record(ComparisonCase::BothWrong);
        let snap = board.snapshot();
        assert_eq!(snap.scored, 4);
        assert_eq!(snap.sideways, 1);
        assert!((snap.ai_accuracy - 0.5).abs() < 1e-12);
        assert!((snap.user_accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_scoreboard_has_zero_accuracy() {
        let snap = Scoreboard::default().snapshot();
        assert_eq!(snap.scored, 0);
        assert_eq!(snap.ai_accuracy, 0.0);
    }

    #[test]
    fn test_alert_cooldown() {
        let state = AppState::new(AppConfig::offline(), Arc::new(MemoryStore::new()), None, None);
        let t0 = Instant::now();
        assert!(state.claim_alert("TSLA", t0));
        assert!(!state.claim_alert("TSLA", t0 + Duration::from_secs(30)));
        assert!(state.claim_alert("AAPL", t0 + Duration::from_secs(30)));
        assert!(state.claim_alert("TSLA", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_expired_cooldowns_are_dropped() {
        let state = AppState::new(AppConfig::offline(), Arc::new(MemoryStore::new()), None, None);
        let t0 = Instant::now();
        for sym in ["A", "B", "C"] {
            assert!(state.claim_alert(sym, t0));
        }
        assert_eq!(state.alert_cooldowns.lock().unwrap().len(), 3);

        assert!(state.claim_alert("D", t0 + Duration::from_secs(120)));
        assert_eq!(state.alert_cooldowns.lock().unwrap().len(), 1);
    }
}
