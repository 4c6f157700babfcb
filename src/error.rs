use thiserror::Error;

// Import Axum types for HTTP response conversion
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// The custom error type for the application.
#[derive(Debug, Error)]
pub enum Error {
    /// An error originating from the sqlx library.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// An error originating from IO operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A validation error (bad request input).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A not found error (resource does not exist).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A forbidden error (user lacks permission).
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// A conflict error (resource already exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An authentication error (invalid credentials).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The presented session token no longer matches the stored one.
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// Too many requests against a rate-limited route.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// An upstream AI provider error.
    #[error("AI provider error: {0}")]
    Provider(String),

    /// API key missing for provider.
    #[error("API key not configured for provider '{0}'")]
    ApiKeyMissing(String),

    /// An embedding generation error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector store error.
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// A document processing (ingestion) error.
    #[error("Processing error: {0}")]
    Processing(String),

    /// A JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// An internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, Error>` to simplify function signatures.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper function to create standardized error response bodies
fn create_error_body(msg: String, code: &str) -> serde_json::Value {
    serde_json::json!({ "error": msg, "code": code })
}

/// Log error at appropriate level based on error type
/// Client-facing errors (4xx) are logged as warnings, server errors (5xx) as errors
fn log_error(error: &Error, error_code: &str, status_code: u16) {
    if status_code >= 500 {
        tracing::error!(
            error_code,
            error = %error,
            status_code,
            "Error returned to client"
        );
    } else {
        tracing::warn!(
            error_code,
            error = %error,
            status_code,
            "Error returned to client"
        );
    }
}

/// Convert custom Error to HTTP response
///
/// This implementation maps each error variant to an appropriate HTTP status code
/// and returns a JSON response with an error message and error code.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        log_error(&self, self.error_code(), self.status_code());

        let (body, status) = match self {
            Error::Validation(msg) => (
                create_error_body(msg, "VALIDATION_ERROR"),
                StatusCode::BAD_REQUEST,
            ),
            Error::NotFound(msg) => (create_error_body(msg, "NOT_FOUND"), StatusCode::NOT_FOUND),
            Error::Forbidden(msg) => (create_error_body(msg, "FORBIDDEN"), StatusCode::FORBIDDEN),
            Error::Conflict(msg) => (create_error_body(msg, "CONFLICT"), StatusCode::CONFLICT),
            Error::Authentication(msg) => (
                create_error_body(msg, "AUTHENTICATION_FAILED"),
                StatusCode::UNAUTHORIZED,
            ),
            Error::SessionInvalidated(msg) => (
                create_error_body(msg, "SESSION_INVALIDATED"),
                StatusCode::UNAUTHORIZED,
            ),
            Error::RateLimitExceeded(msg) => (
                create_error_body(msg, "RATE_LIMIT_EXCEEDED"),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            Error::Provider(msg) => (
                create_error_body(msg, "AI_PROVIDER_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::ApiKeyMissing(provider) => (
                create_error_body(
                    format!("API key not configured for provider '{}'", provider),
                    "API_KEY_MISSING",
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Embedding(msg) => (
                create_error_body(msg, "EMBEDDING_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::VectorStore(msg) => (
                create_error_body(msg, "VECTOR_STORE_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Processing(msg) => (
                create_error_body(msg, "PROCESSING_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Sqlx(_) => (
                create_error_body("Database error".to_string(), "INTERNAL_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Io(_) => (
                create_error_body("IO error".to_string(), "INTERNAL_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Json(e) => (
                create_error_body(format!("Invalid JSON payload: {}", e), "VALIDATION_ERROR"),
                StatusCode::BAD_REQUEST,
            ),
            Error::Config(_) => (
                create_error_body("Configuration error".to_string(), "CONFIG_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            Error::Internal(_) => (
                create_error_body("Internal server error".to_string(), "INTERNAL_ERROR"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl Error {
    /// Helper method to get the HTTP status code for an error
    fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Json(_) => 400,
            Error::Authentication(_) | Error::SessionInvalidated(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RateLimitExceeded(_) => 429,
            _ => 500,
        }
    }

    /// Helper method to get the error code for logging
    fn error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::Conflict(_) => "CONFLICT",
            Error::Authentication(_) => "AUTHENTICATION_FAILED",
            Error::SessionInvalidated(_) => "SESSION_INVALIDATED",
            Error::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            Error::Provider(_) => "AI_PROVIDER_ERROR",
            Error::ApiKeyMissing(_) => "API_KEY_MISSING",
            Error::Embedding(_) => "EMBEDDING_ERROR",
            Error::VectorStore(_) => "VECTOR_STORE_ERROR",
            Error::Processing(_) => "PROCESSING_ERROR",
            Error::Sqlx(_) | Error::Io(_) | Error::Internal(_) => "INTERNAL_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}
