//! Error types for zero-screener.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Screener service errors.
///
/// Every variant maps to one stable `kind` string that callers can match on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScreenerError {
    #[error("Unknown screener: {0}")]
    UnknownScreener(String),

    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// A CDP call failed mid-fetch; the session is suspect.
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Render timeout after {timeout_secs}s: {url}")]
    RenderTimeout { url: String, timeout_secs: u64 },

    #[error("Export failed: {0}")]
    ExportFailure(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScreenerError {
    /// Stable error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ScreenerError::UnknownScreener(_) => "UnknownScreenerError",
            ScreenerError::UnknownIndex(_) => "UnknownIndexError",
            ScreenerError::DataSource(_) => "DataSourceError",
            ScreenerError::SessionUnavailable(_) | ScreenerError::Browser(_) => {
                "SessionUnavailableError"
            }
            ScreenerError::RenderTimeout { .. } => "RenderTimeoutError",
            ScreenerError::ExportFailure(_) => "ExportFailureError",
            ScreenerError::Authentication(_) => "AuthenticationError",
            ScreenerError::InvalidRequest(_) => "InvalidRequestError",
            ScreenerError::Internal(_) => "InternalError",
        }
    }

    /// Whether a fetch may be retried once with a fresh session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScreenerError::RenderTimeout { .. }
                | ScreenerError::ExportFailure(_)
                | ScreenerError::Browser(_)
        )
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScreenerError::UnknownScreener(_) | ScreenerError::UnknownIndex(_) => {
                StatusCode::NOT_FOUND
            }
            ScreenerError::DataSource(_) | ScreenerError::ExportFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            ScreenerError::SessionUnavailable(_) | ScreenerError::Browser(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ScreenerError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ScreenerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ScreenerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ScreenerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured `{kind, message}` body.
    pub fn to_api_error(&self) -> ApiError {
        ApiError {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }

    /// `{"error": {"kind", "message"}}` payload.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_api_error() })
    }
}

impl From<chromiumoxide::error::CdpError> for ScreenerError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScreenerError::Browser(err.to_string())
    }
}

impl From<std::io::Error> for ScreenerError {
    fn from(err: std::io::Error) -> Self {
        ScreenerError::Internal(err.to_string())
    }
}

/// API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

impl IntoResponse for ScreenerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.to_api_error(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ScreenerError>;
