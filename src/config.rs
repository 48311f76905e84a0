use crate::errors::{AppError, AppResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Market data key. `None` puts price lookups in offline mock mode.
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_base_url: String,
    pub gnews_api_key: Option<String>,
    pub gnews_base_url: String,
    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
    pub groq_model: String,
    /// Prediction microservice. `None` means always use the local fallback.
    pub ml_service_url: Option<String>,
    pub data_dir: PathBuf,
    pub server_port: u16,
    pub cors_origin: String,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = env_var_or("SERVER_PORT", "8000")
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("SERVER_PORT: {e}")))?;

        let rate_limit_max = env_var_or("RATE_LIMIT_MAX", "20")
            .parse::<u32>()
            .map_err(|e| AppError::Config(format!("RATE_LIMIT_MAX: {e}")))?;

        let rate_limit_window_secs = env_var_or("RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("RATE_LIMIT_WINDOW_SECS: {e}")))?;

        if rate_limit_window_secs == 0 {
            return Err(AppError::Config("RATE_LIMIT_WINDOW_SECS must be positive".into()));
        }

        let ml_service_url = match env_var_or("ML_SERVICE_URL", "http://127.0.0.1:8001").trim() {
            "" | "off" => None,
            url => Some(url.to_string()),
        };

        Ok(Self {
            alpha_vantage_api_key: optional_env_var("ALPHA_VANTAGE_API_KEY"),
            alpha_vantage_base_url: env_var_or(
                "ALPHA_VANTAGE_BASE_URL",
                "https://www.alphavantage.co",
            ),
            gnews_api_key: optional_env_var("GNEWS_API_KEY"),
            gnews_base_url: env_var_or("GNEWS_BASE_URL", "https://gnews.io/api/v4"),
            groq_api_key: optional_env_var("GROQ_API_KEY"),
            groq_base_url: env_var_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1"),
            groq_model: env_var_or("GROQ_MODEL", "llama-3.3-70b-versatile"),
            ml_service_url,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port,
            cors_origin: env_var_or("CORS_ORIGIN", "*"),
            rate_limit_max,
            rate_limit_window_secs,
        })
    }

    /// Every provider key unset: all lookups resolve to deterministic mocks.
    #[cfg(test)]
    pub fn offline() -> Self {
        Self {
            alpha_vantage_api_key: None,
            alpha_vantage_base_url: "http://127.0.0.1:9".into(),
            gnews_api_key: None,
            gnews_base_url: "http://127.0.0.1:9".into(),
            groq_api_key: None,
            groq_base_url: "http://127.0.0.1:9".into(),
            groq_model: "test-model".into(),
            ml_service_url: None,
            data_dir: PathBuf::from("data"),
            server_port: 0,
            cors_origin: "*".into(),
            rate_limit_max: 1000,
            rate_limit_window_secs: 60,
        }
    }
}

fn optional_env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
