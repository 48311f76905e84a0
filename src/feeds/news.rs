use super::types::NewsSearchResponse;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use portable_atomic::{AtomicU64, Ordering};
use reqwest::Client;
use std::time::Duration;

const NEWS_TIMEOUT: Duration = Duration::from_secs(6);
const MAX_HEADLINES: usize = 5;

/// GNews headline search with a fixed offline fallback.
pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    pub fallbacks: AtomicU64,
}

impl NewsClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(NEWS_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.gnews_base_url.trim_end_matches('/').to_string(),
            api_key: config.gnews_api_key.clone(),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Up to five recent headlines for `symbol`.
    pub async fn headlines(&self, symbol: &str) -> Vec<String> {
        let Some(key) = self.api_key.as_deref() else {
            return mock_headlines(symbol);
        };
        match self.fetch_headlines(key, symbol).await {
            Ok(titles) if !titles.is_empty() => titles,
            Ok(_) => mock_headlines(symbol),
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, error = %e, "news fetch failed, using mock headlines");
                mock_headlines(symbol)
            }
        }
    }

    async fn fetch_headlines(&self, key: &str, symbol: &str) -> AppResult<Vec<String>> {
        let url = format!("{}/search", self.base_url);
        let max = MAX_HEADLINES.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[("q", symbol), ("lang", "en"), ("max", max.as_str()), ("token", key)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), body });
        }

        let data: NewsSearchResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("news: {e}")))?;
        Ok(titles_from_payload(data))
    }
}

/// Non-blank article titles, capped at `MAX_HEADLINES`.
fn titles_from_payload(data: NewsSearchResponse) -> Vec<String> {
    data.articles
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.title)
        .filter(|t| !t.trim().is_empty())
        .take(MAX_HEADLINES)
        .collect()
}

pub fn mock_headlines(symbol: &str) -> Vec<String> {
    vec![
        format!("{symbol} sees steady investor interest"),
        format!("{symbol} announces product updates"),
        format!("{symbol} market shows mixed signals"),
    ]
}
