use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Market data (Alpha Vantage) ──

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    pub global_quote: Option<GlobalQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalQuote {
    #[serde(rename = "05. price")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailySeriesResponse {
    /// Keyed by ISO date.
    #[serde(rename = "Time Series (Daily)")]
    pub time_series: Option<BTreeMap<String, DailyBar>>,
    /// Present instead of data when the free-tier quota is exhausted.
    #[serde(rename = "Note")]
    pub note: Option<String>,
    #[serde(rename = "Information")]
    pub information: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyBar {
    #[serde(rename = "1. open")]
    pub open: String,
    #[serde(rename = "2. high")]
    pub high: String,
    #[serde(rename = "3. low")]
    pub low: String,
    #[serde(rename = "4. close")]
    pub close: String,
}

// ── News (GNews) ──

#[derive(Debug, Clone, Deserialize)]
pub struct NewsSearchResponse {
    pub articles: Option<Vec<Article>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    pub title: Option<String>,
}

// ── LLM (OpenAI-compatible chat completions) ──

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatMessage>,
}

/// JSON object the sentiment prompt asks the model to return.
#[derive(Debug, Clone, Deserialize)]
pub struct SentimentPayload {
    pub sentiment_score: Option<f64>,
    pub impact_strength: Option<f64>,
    pub summary: Option<String>,
}

// ── Prediction microservice ──

#[derive(Debug, Clone, Serialize)]
pub struct PredictServiceRequest<'a> {
    pub symbol: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictServiceResponse {
    pub prediction: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}
