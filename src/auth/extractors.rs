//! Axum extractor for bearer-token authentication.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use super::errors::AuthError;
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::jwt::JwtError;

/// Extract the token from an `Authorization: Bearer <token>` header.
/// Returns `None` for a missing header, another scheme, or an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

async fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthError>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = bearer_token(&parts.headers).ok_or(AuthError::Required)?;

    let claims = state
        .jwt()
        .validate_access_token(token)
        .map_err(|e| match e {
            JwtError::Expired => AuthError::TokenExpired,
            other => {
                tracing::debug!(error = %other, "Rejected access token");
                AuthError::InvalidToken
            }
        })?;

    let user = state
        .db()
        .users()
        .get_by_uuid(&claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get user");
            AuthError::Internal
        })?
        .ok_or(AuthError::Required)?;

    Ok(AuthenticatedUser { claims, user })
}

/// Extractor for API endpoints that require authentication.
/// Validates the access token (short-lived, stateless) and loads its user.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state).await.map(Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
