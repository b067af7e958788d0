use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::CallbackStatus;

/// Application-specific error types.
///
/// Every failure is scoped to the request being handled; nothing here is
/// fatal to the process.
#[derive(Debug)]
pub enum AppError {
    /// Bad input shape or range. Never retried.
    Validation(String),
    /// A required field was absent from the request.
    MissingField(&'static str),
    /// Missing representative, callback request, rating or question.
    NotFound(String),
    /// Ownership or role violation. Never retried.
    Forbidden(String),
    /// State machine guard violation. The caller may retry after re-reading.
    InvalidTransition {
        /// Status observed when the transition was evaluated.
        from: CallbackStatus,
        /// Requested action (`schedule`, `complete`, `cancel`, ...).
        action: String,
    },
    /// A concurrent writer won the race. Safe to retry once.
    Conflict(String),
    /// Persistence timed out or the store is shedding load. Retry with backoff.
    Unavailable(String),
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether the failed operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Conflict(_) | AppError::Unavailable(_) => true,
            AppError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Strips any context wrappers and returns the innermost error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidTransition { .. } | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::WithContext { source, .. } => source.status(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::MissingField(field) => write!(f, "Missing required field: {}", field),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::InvalidTransition { from, action } => {
                write!(f, "Invalid transition: cannot {} a {} request", action, from)
            }
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Client errors are surfaced verbatim; infrastructure errors are logged
    /// and replaced with a generic message.
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                "External service error".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                "Service temporarily unavailable".to_string()
            }
            AppError::Forbidden(msg) => {
                tracing::warn!("Forbidden: {}", msg);
                self.to_string()
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.clone().into_response();
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::MissingField(field) => AppError::MissingField(field),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::Forbidden(msg) => AppError::Forbidden(msg.clone()),
            AppError::InvalidTransition { from, action } => AppError::InvalidTransition {
                from: *from,
                action: action.clone(),
            },
            AppError::Conflict(msg) => AppError::Conflict(msg.clone()),
            AppError::Unavailable(msg) => AppError::Unavailable(msg.clone()),
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound), // Simplified clone
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    ///
    /// Pool exhaustion maps to `Unavailable`; Postgres serialization failures
    /// and deadlocks map to `Conflict` so callers can retry them.
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                AppError::Conflict(db_err.message().to_string())
            }
            _ => AppError::DatabaseError(err),
        }
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: f(),
        })
    }
}
