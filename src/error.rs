// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! [`AppError`] is what HTTP handlers return. [`SyncError`] is the closed
//! taxonomy the token manager, provider adapters and sync orchestrator speak;
//! raw provider or transport errors never cross the adapter boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::ProviderApi(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

/// Default back-off when a provider rate-limits without a `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Classified failure of a token or provider-data operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// No active credential for this (user, provider).
    #[error("not connected")]
    NotConnected,

    /// The refresh grant was rejected; the user has to reconnect.
    #[error("reconnect required: {0}")]
    TokenExpiredUnrecoverable(String),

    /// Timeout, connection failure or 5xx. Credential state is untouched.
    #[error("transient network error: {0}")]
    TransientNetworkError(String),

    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The provider answered with something we could not parse at all.
    #[error("malformed provider payload: {0}")]
    MalformedProviderPayload(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The provider rejected an access token we still consider valid.
    #[error("provider rejected access token")]
    Unauthorized,

    /// Any other non-success status from the provider.
    #[error("provider API error (HTTP {status}): {message}")]
    ProviderApi { status: u16, message: String },
}

impl SyncError {
    /// Whether retrying on the next sync cycle can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetworkError(_)
                | SyncError::RateLimited { .. }
                | SyncError::PersistenceError(_)
                | SyncError::Unauthorized
        )
    }

    /// Whether the user must go through the OAuth flow again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, SyncError::TokenExpiredUnrecoverable(_))
    }
}

impl From<AppError> for SyncError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(msg) => SyncError::PersistenceError(msg),
            other => SyncError::PersistenceError(other.to_string()),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConnected => AppError::NotFound("Integration not connected".to_string()),
            SyncError::PersistenceError(msg) => AppError::Database(msg),
            other => AppError::ProviderApi(other.to_string()),
        }
    }
}
