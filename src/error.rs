use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Quota and store failures deny the premium path; callers fall back to free tier.
        let (status, body) = match &self {
            AppError::Ledger(LedgerError::QuotaExceeded(exceeded)) => {
                tracing::info!(?exceeded, "voice quota exceeded");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({
                        "error": "voice_quota_exceeded",
                        "scope": exceeded.scope,
                        "requested": exceeded.requested,
                        "remaining": exceeded.remaining,
                        "fallback": "free_tier",
                    }),
                )
            }
            AppError::Ledger(LedgerError::InvalidAmount(message)) | AppError::BadRequest(message) => {
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "bad_request", "message": message }),
                )
            }
            AppError::Ledger(err) => {
                tracing::error!(?err, "voice ledger unavailable; failing closed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "voice_temporarily_unavailable",
                        "fallback": "free_tier",
                    }),
                )
            }
            AppError::Unavailable(message) => {
                tracing::error!(%message, "request could not be queued");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "temporarily_unavailable" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
