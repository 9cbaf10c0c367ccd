//! Application-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use escrow_protocol::EscrowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Escrow(e) => match e {
                EscrowError::ProjectNotFound(_)
                | EscrowError::MilestoneNotFound { .. }
                | EscrowError::UnknownIntent(_) => StatusCode::NOT_FOUND,
                EscrowError::NotFunder | EscrowError::NotAssignedWorker => StatusCode::FORBIDDEN,
                EscrowError::InvalidAmount
                | EscrowError::InvalidFee
                | EscrowError::NoteTooLong(_)
                | EscrowError::PercentageMismatch { .. }
                | EscrowError::MissingReason => StatusCode::BAD_REQUEST,
                EscrowError::IllegalState { .. } | EscrowError::AlreadyReleased => {
                    StatusCode::CONFLICT
                }
                EscrowError::SettlementTimeout => StatusCode::GATEWAY_TIMEOUT,
                EscrowError::SettlementRejected(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Database(_) | ApiError::Migrate(_) | ApiError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Http(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
