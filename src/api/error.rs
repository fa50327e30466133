//! Shared error handling for API endpoints.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::internal(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed input (422).
    Validation {
        message: String,
        field: Option<&'static str>,
    },
    /// Request is missing something it cannot proceed without (400).
    BadRequest(String),
    /// Token problem; the code tells the client whether to refresh (401).
    Auth(AuthError),
    /// Wrong email/password, or wrong current password (401).
    InvalidCredentials(String),
    Conflict(String),
    NotFound(String),
    /// Generic 500. The cause has already been logged.
    Internal,
}

impl ApiError {
    pub fn validation(field: &'static str, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn invalid_credentials(msg: impl Into<String>) -> Self {
        Self::InvalidCredentials(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!(error = %e, "{}", context);
        Self::Internal
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => e.status_code(),
            ApiError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Auth(e) => e.code(),
            ApiError::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal => ApiError::Internal,
            other => ApiError::Auth(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.code();
        let (message, field) = match self {
            ApiError::Validation { message, field } => (message, field),
            ApiError::BadRequest(msg)
            | ApiError::InvalidCredentials(msg)
            | ApiError::Conflict(msg)
            | ApiError::NotFound(msg) => (msg, None),
            ApiError::Auth(e) => (e.message().to_string(), None),
            ApiError::Internal => ("Internal server error".to_string(), None),
        };
        (
            status,
            Json(ErrorResponse {
                error,
                message,
                field,
            }),
        )
            .into_response()
    }
}

/// Trimmed, non-empty value of an optional field.
pub fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::validation(field, format!("{} is required", field))),
    }
}

/// Non-empty value of an optional password field, untrimmed.
pub fn required_password<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ApiError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::validation(field, format!("{} is required", field))),
    }
}

/// Validate a display name: 2 to 50 characters after trimming.
pub fn validate_name(name: &str) -> Result<(), ApiError> {
    let len = name.chars().count();
    if !(2..=50).contains(&len) {
        return Err(ApiError::validation(
            "name",
            "Name must be between 2 and 50 characters",
        ));
    }
    Ok(())
}

/// Normalize an email to lowercase and check it has the shape `local@domain.tld`.
pub fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
                && domain
                    .rsplit_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::validation("email", "Email is not valid"));
    }
    Ok(email)
}
