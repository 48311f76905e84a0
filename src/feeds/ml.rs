use super::market_data::MarketDataClient;
use super::types::{PredictServiceRequest, PredictServiceResponse};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::signals::indicators::predict_from_series;
use crate::signals::{ModelPrediction, PredictionSource};
use crate::state::Direction;
use portable_atomic::{AtomicU64, Ordering};
use reqwest::Client;
use std::time::Duration;

const PREDICT_TIMEOUT: Duration = Duration::from_secs(8);

/// Daily bars fed to the local fallback (enough for a 50-day average).
pub const LOCAL_HISTORY_DAYS: usize = 60;

/// Service defaults when fields are missing from an otherwise valid reply.
const DEFAULT_CONFIDENCE: f64 = 0.6;

/// Client for the prediction microservice.
pub struct MlClient {
    client: Client,
    base_url: Option<String>,
    pub fallbacks: AtomicU64,
}

impl MlClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(PREDICT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config
                .ml_service_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Service prediction, or the local momentum/RSI call over recent bars
    /// when the service is disabled or unreachable.
    pub async fn predict(&self, symbol: &str, market: &MarketDataClient) -> ModelPrediction {
        if let Some(base) = self.base_url.as_deref() {
            match self.fetch_prediction(base, symbol).await {
                Ok(p) => return p,
                Err(e) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(symbol = %symbol, error = %e, "prediction service failed, using local model");
                }
            }
        }
        let series = market.daily_series(symbol, LOCAL_HISTORY_DAYS).await;
        predict_from_series(&series)
    }

    async fn fetch_prediction(&self, base: &str, symbol: &str) -> AppResult<ModelPrediction> {
        let url = format!("{base}/predict-stock");
        let resp = self
            .client
            .post(&url)
            .json(&PredictServiceRequest { symbol })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), body });
        }

        let data: PredictServiceResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("predict-stock: {e}")))?;
        Ok(from_service(data))
    }
}

fn from_service(data: PredictServiceResponse) -> ModelPrediction {
    let prediction = match data.prediction.as_deref() {
        Some(p) if p.eq_ignore_ascii_case("down") => Direction::Down,
        _ => Direction::Up,
    };
    let confidence = data
        .confidence
        .filter(|c| c.is_finite() && *c > 0.0)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    ModelPrediction {
        prediction,
        confidence,
        indicators: data.indicators,
        source: PredictionSource::Service,
    }
}
