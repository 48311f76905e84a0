use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Error types for the service.
/// Provider failures are mostly absorbed into deterministic fallbacks;
/// what reaches a handler is mapped to a JSON `{"error": code}` body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("upstream API error: {status} {body}")]
    Upstream { status: u16, body: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(&'static str),

    #[error("rate limited")]
    RateLimited,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Network(_) | AppError::Parse(_) | AppError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Database(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code for the response body.
    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(code) => code,
            AppError::RateLimited => "rate_limited",
            AppError::Network(_) | AppError::Parse(_) | AppError::Upstream { .. } => {
                "upstream_failed"
            }
            AppError::Database(_) => "storage_failed",
            AppError::Config(_) => "misconfigured",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.code() }))).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
