use super::types::{ChatMessage, ChatRequest, ChatResponse, SentimentPayload};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use portable_atomic::{AtomicU64, Ordering};
use reqwest::Client;
use std::time::Duration;

pub const SENTIMENT_TIMEOUT: Duration = Duration::from_secs(12);

const KEYWORD_SHIFT: f64 = 0.2;
const DEFAULT_IMPACT: f64 = 5.0;
const NEUTRAL_SUMMARY: &str = "Neutral to mild sentiment based on headlines.";

/// Alerts fire at or above this impact...
const HIGH_IMPACT_STRENGTH: f64 = 8.0;
/// ...or beyond this absolute sentiment.
const HIGH_IMPACT_SENTIMENT: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SentimentAnalysis {
    /// In [-1, 1].
    pub sentiment_score: f64,
    /// In [1, 10].
    pub impact_strength: f64,
    pub summary: String,
}

impl SentimentAnalysis {
    pub fn is_high_impact(&self) -> bool {
        self.impact_strength >= HIGH_IMPACT_STRENGTH
            || self.sentiment_score.abs() > HIGH_IMPACT_SENTIMENT
    }
}

/// Chat-completions client (Groq, OpenAI-compatible).
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    pub fallbacks: AtomicU64,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: config.groq_base_url.trim_end_matches('/').to_string(),
            api_key: config.groq_api_key.clone(),
            model: config.groq_model.clone(),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Single completion. Errors when no key is configured.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        timeout: Duration,
    ) -> AppResult<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("no LLM key configured".into()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest { model: &self.model, messages, temperature };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), body });
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("chat completion: {e}")))?;
        completion_text(data)
    }

    /// Score headlines. Falls back to the keyword heuristic when the model
    /// is unavailable or returns something that is not the expected JSON.
    pub async fn analyze_sentiment(&self, headlines: &[String]) -> SentimentAnalysis {
        if !self.is_configured() {
            return keyword_sentiment(headlines);
        }

        let mut prompt = String::from(
            "Analyze these finance headlines and return JSON with fields \
             sentiment_score (-1..1), impact_strength (1..10), summary.",
        );
        for (i, h) in headlines.iter().enumerate() {
            prompt.push_str(&format!("\n{}. {h}", i + 1));
        }
        let messages = [
            ChatMessage::system("You are a financial news analyst."),
            ChatMessage::user(prompt),
        ];

        match self.complete(&messages, 0.2, SENTIMENT_TIMEOUT).await {
            Ok(content) => parse_sentiment(&content).unwrap_or_else(|| {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("sentiment reply was not valid JSON, using keyword fallback");
                keyword_sentiment(headlines)
            }),
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "sentiment request failed, using keyword fallback");
                keyword_sentiment(headlines)
            }
        }
    }
}

/// Parse the model's JSON reply, tolerating surrounding prose or code fences.
pub fn parse_sentiment(content: &str) -> Option<SentimentAnalysis> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let payload: SentimentPayload = serde_json::from_str(&content[start..=end]).ok()?;

    let score = payload.sentiment_score.filter(|v| v.is_finite()).unwrap_or(0.0);
    let impact = payload.impact_strength.filter(|v| v.is_finite()).unwrap_or(DEFAULT_IMPACT);
    Some(SentimentAnalysis {
        sentiment_score: score.clamp(-1.0, 1.0),
        impact_strength: impact.clamp(1.0, 10.0),
        summary: payload.summary.unwrap_or_default(),
    })
}

/// Substring heuristic: "up" nudges positive, "down" nudges negative.
pub fn keyword_sentiment(headlines: &[String]) -> SentimentAnalysis {
    let text = headlines.join(" ").to_lowercase();
    let mut score: f64 = 0.0;
    if text.contains("up") {
        score += KEYWORD_SHIFT;
    }
    if text.contains("down") {
        score -= KEYWORD_SHIFT;
    }
    SentimentAnalysis {
        sentiment_score: score,
        impact_strength: DEFAULT_IMPACT,
        summary: NEUTRAL_SUMMARY.to_string(),
    }
}

/// Content of the first choice carrying a message. Blank content is an error.
fn completion_text(data: ChatResponse) -> AppResult<String> {
    data.choices
        .into_iter()
        .find_map(|c| c.message)
        .map(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Parse("empty completion".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(json: serde_json::Value) -> AppResult<String> {
        completion_text(serde_json::from_value(json).unwrap())
    }

    #[test]
    fn test_completion_text() {
        let ok = completion(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                {"index": 0, "message": null, "finish_reason": "length"},
                {"index": 1, "message": {"role": "assistant", "content": "Hold steady."}, "finish_reason": "stop"}
            ],
            "usage": {"total_tokens": 12}
        }));
        assert_eq!(ok.unwrap(), "Hold steady.");

        let blank = completion(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  \n "}}]
        }));
        assert!(matches!(blank, Err(AppError::Parse(_))));

        assert!(matches!(completion(serde_json::json!({"choices": []})), Err(AppError::Parse(_))));
        assert!(matches!(completion(serde_json::json!({})), Err(AppError::Parse(_))));
    }

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keyword_sentiment() {
        assert_eq!(keyword_sentiment(&lines(&["Shares jump UP"])).sentiment_score, 0.2);
        assert_eq!(keyword_sentiment(&lines(&["Stock goes down"])).sentiment_score, -0.2);
        assert_eq!(keyword_sentiment(&lines(&["up then down"])).sentiment_score, 0.0);
        assert_eq!(keyword_sentiment(&lines(&["flat"])).sentiment_score, 0.0);
        assert_eq!(keyword_sentiment(&[]).impact_strength, 5.0);
    }

    #[test]
    fn test_keyword_sentiment_matches_substrings() {
        // "updates" contains "up"
        let s = keyword_sentiment(&crate::feeds::news::mock_headlines("AAPL"));
        assert_eq!(s.sentiment_score, 0.2);
        assert!(!s.is_high_impact());
    }

    #[test]
    fn test_parse_sentiment_plain_json() {
        let s = parse_sentiment(r#"{"sentiment_score": 0.7, "impact_strength": 9, "summary": "Strong beat"}"#)
            .unwrap();
        assert_eq!(s.sentiment_score, 0.7);
        assert_eq!(s.impact_strength, 9.0);
        assert_eq!(s.summary, "Strong beat");
        assert!(s.is_high_impact());
    }

    #[test]
    fn test_parse_sentiment_fenced_and_clamped() {
        let reply = "Here you go:\n```json\n{\"sentiment_score\": -3, \"impact_strength\": 42}\n```";
        let s = parse_sentiment(reply).unwrap();
        assert_eq!(s.sentiment_score, -1.0);
        assert_eq!(s.impact_strength, 10.0);
        assert_eq!(s.summary, "");
    }

    #[test]
    fn test_parse_sentiment_rejects_garbage() {
        assert!(parse_sentiment("no json here").is_none());
        assert!(parse_sentiment("} backwards {").is_none());
        assert!(parse_sentiment(r#"{"sentiment_score": "high"}"#).is_none());
    }

    #[test]
    fn test_high_impact_rule() {
        let mk = |score, impact| SentimentAnalysis {
            sentiment_score: score,
            impact_strength: impact,
            summary: String::new(),
        };
        assert!(mk(0.0, 8.0).is_high_impact());
        assert!(mk(-0.61, 1.0).is_high_impact());
        assert!(!mk(0.6, 7.9).is_high_impact());
    }

    #[tokio::test]
    async fn test_offline_complete_errors_and_sentiment_falls_back() {
        let client = LlmClient::new(&AppConfig::offline());
        assert!(!client.is_configured());
        let err = client
            .complete(&[ChatMessage::user("hi")], 0.2, SENTIMENT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let h = lines(&["Market down sharply"]);
        assert_eq!(client.analyze_sentiment(&h).await, keyword_sentiment(&h));
    }
}
