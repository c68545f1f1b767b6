/// Unified error handling for the service.
///
/// Three layers:
/// 1. Domain error enums (validation, auth, storage)
/// 2. The `AppError` control-flow type everything converts into
/// 3. HTTP mapping through actix's `ResponseError`, with server-side logging
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

/// Validation errors for input data. Messages are field-specific and safe
/// to show to the client.
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(&'static str),
    TooShort(&'static str, usize),
    TooLong(&'static str, usize),
    InvalidFormat(&'static str),
    SuspiciousContent(&'static str),
    Expired(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::SuspiciousContent(field) => {
                write!(f, "{} contains suspicious content", field)
            }
            ValidationError::Expired(field) => write!(f, "{} has expired", field),
        }
    }
}

impl StdError for ValidationError {}

/// Authentication and authorization failures. Client-facing messages are
/// generic per kind and never leak which internal check tripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credential expired; the request path may retry through the refresh
    /// token before surfacing this.
    Expired,
    Malformed,
    BadSignature,
    /// The refresh token appears in the revocation store.
    Revoked,
    Frozen,
    InvalidCredential,
    DuplicateIdentity,
    MissingToken,
}

impl AuthError {
    fn code(&self) -> &'static str {
        match self {
            AuthError::Expired => "SESSION_EXPIRED",
            AuthError::Malformed => "TOKEN_MALFORMED",
            AuthError::BadSignature => "TOKEN_INVALID",
            AuthError::Revoked => "SESSION_REVOKED",
            AuthError::Frozen => "ACCOUNT_FROZEN",
            AuthError::InvalidCredential => "INVALID_CREDENTIAL",
            AuthError::DuplicateIdentity => "DUPLICATE_IDENTITY",
            AuthError::MissingToken => "MISSING_TOKEN",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Expired => write!(f, "session expired"),
            AuthError::Malformed => write!(f, "malformed token"),
            AuthError::BadSignature => write!(f, "invalid token"),
            AuthError::Revoked => {
                write!(f, "logged in elsewhere or token has been revoked")
            }
            AuthError::Frozen => {
                write!(f, "account is frozen, contact the administrator")
            }
            AuthError::InvalidCredential => write!(f, "invalid credential"),
            AuthError::DuplicateIdentity => {
                write!(f, "this email address is already registered")
            }
            AuthError::MissingToken => write!(f, "missing authentication token"),
        }
    }
}

impl StdError for AuthError {}

/// Failures of the durable or cache stores backing the service.
#[derive(Debug)]
pub enum StorageError {
    Database(String),
    Cache(String),
    /// A store call exceeded the request-scoped deadline.
    Timeout(&'static str),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Database(msg) => write!(f, "database error: {}", msg),
            StorageError::Cache(msg) => write!(f, "cache store error: {}", msg),
            StorageError::Timeout(op) => write!(f, "store call timed out: {}", op),
        }
    }
}

impl StdError for StorageError {}

/// Central error type all application errors map to.
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Auth(AuthError),
    Storage(StorageError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Storage(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        if message.contains("duplicate key") || message.contains("unique constraint") {
            // A concurrent insert can slip past the pre-insert existence
            // check; the constraint is the authority.
            AppError::Auth(AuthError::DuplicateIdentity)
        } else {
            AppError::Storage(StorageError::Database(message))
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Storage(StorageError::Cache(err.to_string()))
    }
}

/// Bound a store call by the request-scoped deadline. An elapsed deadline
/// aborts the in-flight call and surfaces as a storage error instead of
/// hanging the worker.
pub async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Storage(StorageError::Timeout(op))),
    }
}

/// JSON body returned for every error response.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(message: String, code: String, status: u16) -> Self {
        Self {
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl AppError {
    pub fn log(&self) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(error = %e, "Validation error");
            }
            AppError::Auth(e) => {
                tracing::warn!(error = %e, kind = e.code(), "Authentication error");
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, "Storage error");
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
            }
        }
    }

    pub(crate) fn http_parts(&self) -> (StatusCode, String, String) {
        match self {
            AppError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR".to_string(),
                e.to_string(),
            ),
            AppError::Auth(e) => {
                let status = match e {
                    AuthError::Frozen => StatusCode::FORBIDDEN,
                    AuthError::DuplicateIdentity => StatusCode::CONFLICT,
                    _ => StatusCode::UNAUTHORIZED,
                };
                (status, e.code().to_string(), e.to_string())
            }
            AppError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR".to_string(),
                "internal error".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "internal server error".to_string(),
            ),
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        self.log();
        let (status, code, message) = self.http_parts();
        HttpResponse::build(status).json(ErrorResponse::new(message, code, status.as_u16()))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        self.to_response()
    }

    fn status_code(&self) -> StatusCode {
        self.http_parts().0
    }
}
