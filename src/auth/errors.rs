//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a request could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token, or the token's subject no longer exists.
    Required,
    /// Malformed token or bad signature.
    InvalidToken,
    /// Valid signature, past expiry. The client should refresh.
    TokenExpired,
    /// Refresh token does not match the stored one, or has expired.
    InvalidRefreshToken,
    /// The user lookup failed.
    Internal,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Required => "AUTH_REQUIRED",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthError::Required => "Authentication required",
            AuthError::InvalidToken => "Invalid token",
            AuthError::TokenExpired => "Token has expired",
            AuthError::InvalidRefreshToken => "Invalid refresh token",
            AuthError::Internal => "Internal server error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for AuthError {}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.code(),
                message: self.message(),
            }),
        )
            .into_response()
    }
}
