use crate::analytics::history::reconstruct_history;
use crate::analytics::portfolio::compute_analytics;
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::feeds::llm::SentimentAnalysis;
use crate::feeds::types::ChatMessage;
use crate::signals::compare::{classify_move, compare};
use crate::signals::hybrid::blend;
use crate::state::{AppState, DbCommand, Direction, Holding, MoveDirection, Portfolio, PriceSeries};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use futures_util::future::join_all;
use portable_atomic::Ordering::Relaxed;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_HISTORY_DAYS: usize = 30;
const MAX_SERIES_DAYS: usize = 90;
const DEFAULT_PREDICTION_LIMIT: usize = 50;
const MAX_PREDICTION_LIMIT: usize = 200;
const ADVISOR_MAX_SYMBOLS: usize = 3;

const EXPLANATION_TIMEOUT: Duration = Duration::from_secs(10);
const ADVISOR_TIMEOUT: Duration = Duration::from_secs(15);
const EXPLANATION_PENDING: &str = "Analysis pending...";
const ADVISOR_FALLBACK_REPLY: &str = "Considering your holdings and recent neutral sentiment, \
     diversify gradually and set clear risk limits.";
const ADVISOR_INSIGHTS: [&str; 3] = [
    "Diversification and risk controls matter",
    "Monitor news-driven volatility",
    "Align positions with time horizon",
];

// ── Request bodies ──

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHoldingRequest {
    pub user_id: Option<String>,
    /// Kept loose so a malformed holding maps to `invalid_holding`.
    pub holding: Option<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub symbol: Option<String>,
    pub user_prediction: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorRequest {
    pub user_id: Option<String>,
    pub message: Option<String>,
}

/// Numeric query values stay as text; anything unparsable reads as absent.
#[derive(serde::Deserialize)]
pub struct DaysQuery {
    pub days: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionHistoryQuery {
    pub user_id: Option<String>,
    pub limit: Option<String>,
}

// ── Responses ──

/// Pushed alongside `/news` when a symbol's headlines are high impact.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NewsAlert {
    pub id: String,
    pub symbol: String,
    pub direction: &'static str,
    pub impact: f64,
    pub score: f64,
    pub message: String,
    pub ts: String,
}

impl NewsAlert {
    fn from_analysis(symbol: &str, analysis: &SentimentAnalysis) -> Self {
        let now = chrono::Utc::now();
        let direction = if analysis.sentiment_score > 0.0 { "BULLISH" } else { "BEARISH" };
        Self {
            id: format!("{symbol}-{}", now.timestamp_millis()),
            symbol: symbol.to_string(),
            direction,
            impact: analysis.impact_strength,
            score: analysis.sentiment_score,
            message: format!(
                "High-impact {} news for {symbol} (impact {}/10, score {:.2}).",
                direction.to_lowercase(),
                analysis.impact_strength,
                analysis.sentiment_score,
            ),
            ts: now.to_rfc3339(),
        }
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_direction(raw: &str) -> Option<Direction> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "UP" => Some(Direction::Up),
        "DOWN" => Some(Direction::Down),
        _ => None,
    }
}

fn parse_count(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
}

fn clamp_days(days: Option<usize>, default: usize) -> usize {
    days.filter(|d| *d > 0).unwrap_or(default).min(MAX_SERIES_DAYS)
}

/// Current price for each distinct symbol, fetched concurrently.
async fn prices_for(state: &AppState, symbols: &[String]) -> HashMap<String, f64> {
    let prices = join_all(symbols.iter().map(|s| state.market.current_price(s))).await;
    symbols.iter().cloned().zip(prices).collect()
}

// ── Health / metrics ──

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "finsight",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /metrics -- performance counters (lock-free reads)
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "requestsServed": state.counters.requests_served.load(Relaxed),
        "requestsRateLimited": state.counters.requests_rate_limited.load(Relaxed),
        "providerFallbacks": state.provider_fallbacks(),
        "predictionsMade": state.counters.predictions_made.load(Relaxed),
        "advisorReplies": state.counters.advisor_replies.load(Relaxed),
        "persistent": state.db.is_some(),
    }))
}

// ── Portfolio ──

/// POST /portfolio/add
pub async fn add_holding(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddHoldingRequest>, JsonRejection>,
) -> AppResult<Json<Portfolio>> {
    let Ok(Json(req)) = body else {
        return Err(AppError::Validation("userId_and_holding_required"));
    };
    let (Some(user_id), Some(raw)) = (non_blank(req.user_id), req.holding) else {
        return Err(AppError::Validation("userId_and_holding_required"));
    };

    let holding = serde_json::from_value::<Holding>(raw)
        .ok()
        .and_then(Holding::normalized)
        .ok_or(AppError::Validation("invalid_holding"))?;

    tracing::info!(user = %user_id, symbol = %holding.symbol, quantity = holding.quantity, "holding added");
    let portfolio = state.store.append(&user_id, holding)?;
    Ok(Json(portfolio))
}

/// GET /portfolio/{user_id} -- portfolio plus analytics
pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let portfolio = state
        .store
        .get(&user_id)?
        .unwrap_or_else(|| Portfolio::empty(&user_id));

    let prices = prices_for(&state, &portfolio.symbols()).await;
    let analytics = compute_analytics(&portfolio.holdings, |s| prices.get(s).copied());

    Ok(Json(serde_json::json!({
        "userId": portfolio.user_id,
        "holdings": portfolio.holdings,
        "analytics": analytics,
    })))
}

/// GET /portfolio/{user_id}/history?days=
pub async fn get_portfolio_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<DaysQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let days = clamp_days(parse_count(params.days.as_deref()), DEFAULT_HISTORY_DAYS);
    let portfolio = state
        .store
        .get(&user_id)?
        .unwrap_or_else(|| Portfolio::empty(&user_id));

    let symbols = portfolio.symbols();
    let series = join_all(symbols.iter().map(|s| state.market.daily_series(s, days))).await;
    let by_symbol: HashMap<String, PriceSeries> = symbols.into_iter().zip(series).collect();

    let history = reconstruct_history(&portfolio.holdings, &by_symbol, days);
    Ok(Json(serde_json::json!({
        "userId": user_id,
        "days": days,
        "history": history,
    })))
}

// ── Market / news ──

/// GET /market/{symbol}/daily?days=
pub async fn get_daily_series(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<DaysQuery>,
) -> Json<serde_json::Value> {
    let symbol = symbol.trim().to_uppercase();
    let days = clamp_days(parse_count(params.days.as_deref()), DEFAULT_HISTORY_DAYS);
    let series = state.market.daily_series(&symbol, days).await;
    Json(serde_json::json!({ "symbol": symbol, "series": series }))
}

/// GET /news/{symbol} -- headlines, sentiment and an optional high-impact alert
pub async fn get_news(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Json<serde_json::Value> {
    let symbol = symbol.trim().to_uppercase();
    let headlines = state.news.headlines(&symbol).await;
    let sentiment = state.llm.analyze_sentiment(&headlines).await;

    let alert = (sentiment.is_high_impact() && state.claim_alert(&symbol, Instant::now()))
        .then(|| NewsAlert::from_analysis(&symbol, &sentiment));
    if let Some(a) = &alert {
        tracing::info!(symbol = %symbol, direction = a.direction, impact = a.impact, "news alert");
    }

    let mut body = serde_json::json!({
        "symbol": symbol,
        "headlines": headlines,
        "sentiment": sentiment,
    });
    if let Some(a) = alert {
        body["alert"] = serde_json::json!(a);
    }
    Json(body)
}

// ── Prediction game ──

/// POST /predict
pub async fn predict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> AppResult<Json<serde_json::Value>> {
    let Ok(Json(req)) = body else {
        return Err(AppError::Validation("symbol_and_userPrediction_required"));
    };
    let (Some(symbol), Some(raw_prediction)) = (non_blank(req.symbol), non_blank(req.user_prediction))
    else {
        return Err(AppError::Validation("symbol_and_userPrediction_required"));
    };
    let user_prediction =
        parse_direction(&raw_prediction).ok_or(AppError::Validation("invalid_userPrediction"))?;
    let symbol = symbol.to_uppercase();

    let sentiment_fut = async {
        let headlines = state.news.headlines(&symbol).await;
        state.llm.analyze_sentiment(&headlines).await
    };
    let (ai, sentiment, (prev, last)) = tokio::join!(
        state.ml.predict(&symbol, &state.market),
        sentiment_fut,
        state.market.last_two_closes(&symbol),
    );

    let market_move = classify_move(prev, last);
    let comparison = compare(ai.prediction, user_prediction, market_move.actual);
    let hybrid = blend(ai.confidence, sentiment.sentiment_score);

    let explanation = if state.llm.is_configured() {
        let prompt = format!(
            "Stock: {symbol}\n\
             AI Prediction: {} (Confidence: {})\n\
             User Prediction: {user_prediction}\n\
             Actual Market Move: {}\n\
             Sentiment Score: {}\n\
             Comparison Case: {}\n\
             Dominant Signal: {}\n\n\
             As a financial analyst, provide a short, professional 2-3 sentence explanation of this outcome. \
             Mention the \"Dominant Signal\" and why there might be a \"Gap\" between AI and User if they differ.",
            ai.prediction,
            ai.confidence,
            market_move.actual,
            sentiment.sentiment_score,
            comparison.case,
            hybrid.dominant_signal,
        );
        match state.llm.complete(&[ChatMessage::user(prompt)], 0.3, EXPLANATION_TIMEOUT).await {
            Ok(text) => text,
            Err(e) => {
                state.llm.fallbacks.fetch_add(1, Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "explanation failed, using template");
                fallback_explanation(
                    market_move.actual,
                    ai.prediction,
                    user_prediction,
                    hybrid.dominant_signal,
                )
            }
        }
    } else {
        EXPLANATION_PENDING.to_string()
    };

    state.scoreboard.record(comparison.case);
    state.counters.predictions_made.fetch_add(1, Relaxed);
    tracing::info!(
        symbol = %symbol,
        ai = %ai.prediction,
        user = %user_prediction,
        actual = %market_move.actual,
        outcome = %comparison.case,
        "prediction scored"
    );

    if let Some(tx) = &state.db_tx {
        let cmd = DbCommand::InsertPrediction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: non_blank(req.user_id),
            symbol: symbol.clone(),
            ai_prediction: ai.prediction.to_string(),
            ai_confidence: ai.confidence,
            user_prediction: user_prediction.to_string(),
            actual: market_move.actual.to_string(),
            outcome: comparison.case.to_string(),
            hybrid_score: hybrid.hybrid_score,
            dominant_signal: hybrid.dominant_signal.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if tx.send(cmd).await.is_err() {
            tracing::warn!("db writer closed, prediction not logged");
        }
    }

    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "ai": ai,
        "marketMove": market_move,
        "comparison": comparison,
        "hybrid": hybrid,
        "sentiment": sentiment,
        "explanation": explanation,
    })))
}

/// GET /predict/stats -- scoreboard (lock-free reads)
pub async fn prediction_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.scoreboard.snapshot()))
}

/// GET /predict/history -- recent prediction records from DB (cold path)
pub async fn prediction_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PredictionHistoryQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let limit = parse_count(params.limit.as_deref())
        .unwrap_or(DEFAULT_PREDICTION_LIMIT)
        .min(MAX_PREDICTION_LIMIT);
    let user_id = non_blank(params.user_id);
    let predictions = match &state.db {
        Some(pool) => db::get_recent_predictions(pool, user_id.as_deref(), limit)?,
        None => Vec::new(),
    };
    Ok(Json(serde_json::json!({ "predictions": predictions })))
}

// ── Advisor ──

/// POST /advisor/chat
pub async fn advisor_chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AdvisorRequest>, JsonRejection>,
) -> AppResult<Json<serde_json::Value>> {
    let Ok(Json(req)) = body else {
        return Err(AppError::Validation("message_and_userId_required"));
    };
    let (Some(user_id), Some(message)) = (non_blank(req.user_id), non_blank(req.message)) else {
        return Err(AppError::Validation("message_and_userId_required"));
    };

    let portfolio = state
        .store
        .get(&user_id)?
        .unwrap_or_else(|| Portfolio::empty(&user_id));
    let symbols: Vec<String> = portfolio.symbols().into_iter().take(ADVISOR_MAX_SYMBOLS).collect();

    let per_symbol = join_all(symbols.iter().map(|s| state.news.headlines(s))).await;
    let headlines: Vec<String> = symbols
        .iter()
        .zip(per_symbol)
        .flat_map(|(s, list)| list.into_iter().map(move |t| format!("{s}: {t}")))
        .collect();
    let sentiment = state.llm.analyze_sentiment(&headlines).await;

    let reply = if state.llm.is_configured() {
        let context = [
            "You are an intelligent financial advisor. Be concise, educational, and non-promissory.".to_string(),
            format!("User portfolio: {}", serde_json::to_string(&portfolio).unwrap_or_default()),
            format!("Recent sentiment: {}", serde_json::to_string(&sentiment).unwrap_or_default()),
            format!("User message: {message}"),
            "Provide a friendly reply with risk notes and next steps.".to_string(),
        ]
        .join("\n");
        let messages = [
            ChatMessage::system("You are a financial advisor."),
            ChatMessage::user(context),
        ];
        match state.llm.complete(&messages, 0.4, ADVISOR_TIMEOUT).await {
            Ok(text) => text,
            Err(e) => {
                state.llm.fallbacks.fetch_add(1, Relaxed);
                tracing::warn!(user = %user_id, error = %e, "advisor completion failed");
                ADVISOR_FALLBACK_REPLY.to_string()
            }
        }
    } else {
        ADVISOR_FALLBACK_REPLY.to_string()
    };

    state.counters.advisor_replies.fetch_add(1, Relaxed);
    Ok(Json(serde_json::json!({
        "reply": reply,
        "confidenceLevel": advisor_confidence(sentiment.sentiment_score),
        "keyInsights": ADVISOR_INSIGHTS,
    })))
}

/// Plain-text outcome summary used when the explanation completion fails.
fn fallback_explanation(
    actual: MoveDirection,
    ai: Direction,
    user: Direction,
    dominant: Direction,
) -> String {
    format!(
        "The market moved {actual}. AI suggested {ai} while you predicted {user}. \
         The dominant signal was {dominant}."
    )
}

fn advisor_confidence(sentiment_score: f64) -> f64 {
    let s = if sentiment_score.is_finite() { sentiment_score } else { 0.0 };
    (0.5 + 0.3 * s).clamp(0.3, 0.9)
}
