// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// The submission does not fit the document's current shape.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("document not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("change feed disconnected")]
    FeedDisconnected,

    /// Only raised by stores that support conditional writes.
    #[error("write conflict")]
    Conflict,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed document: {0}")]
    Serialization(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Whether the whole operation may be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable(_) | AppError::Conflict | AppError::FeedDisconnected
        )
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidSelection(_) => "INVALID_SELECTION",
            AppError::NotFound => "NOT_FOUND",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::FeedDisconnected => "FEED_DISCONNECTED",
            AppError::Conflict => "CONFLICT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidSelection(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Conflict => (StatusCode::CONFLICT, self.to_string()),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::StoreUnavailable(detail) => {
                error!("Store unavailable: {detail}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The vote store is unavailable, please retry".to_string(),
                )
            }
            AppError::FeedDisconnected => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Serialization(detail) => {
                error!("Malformed document: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Stored document could not be read".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: self.code(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict,
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::StoreUnavailable("store call exceeded its deadline".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(AppError::StoreUnavailable("down".into()).is_retryable());
        assert!(AppError::Conflict.is_retryable());
        assert!(AppError::FeedDisconnected.is_retryable());
        assert!(!AppError::InvalidSelection("bad".into()).is_retryable());
        assert!(!AppError::NotFound.is_retryable());
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::InvalidSelection("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::Conflict, StatusCode::CONFLICT),
            (AppError::StoreUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(AppError::from(sqlx::Error::RowNotFound), AppError::NotFound));
    }
}
