//! Registration and session endpoints: register, login, refresh, logout.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{
    ApiError, ResultExt, normalize_email, required, required_password, validate_name,
};
use crate::auth::AuthError;
use crate::db::{Database, NewUser, is_unique_violation};
use crate::jwt::JwtConfig;
use crate::password::{hash_password, validate_password_policy};
use crate::rate_limit::{RateLimitState, rate_limit_login, rate_limit_register};
use crate::sessions::{self, INVALID_CREDENTIALS_MESSAGE, SessionError, SessionGrant, UserProfile};

#[derive(Clone)]
pub struct SessionsState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

pub fn router(state: SessionsState, rate_limit: Option<RateLimitState>) -> Router {
    let mut register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone());
    let mut login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone());

    if let Some(rate_limit) = rate_limit {
        register_router = register_router.layer(middleware::from_fn_with_state(
            rate_limit.clone(),
            rate_limit_register,
        ));
        login_router =
            login_router.layer(middleware::from_fn_with_state(rate_limit, rate_limit_login));
    }

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state)
        .merge(register_router)
        .merge(login_router)
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidCredentials => {
                ApiError::invalid_credentials(INVALID_CREDENTIALS_MESSAGE)
            }
            SessionError::InvalidRefreshToken => ApiError::Auth(AuthError::InvalidRefreshToken),
            other => ApiError::internal("Session operation failed", other),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    confirm_password: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    message: String,
    user: UserProfile,
}

async fn register(
    State(state): State<SessionsState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let name = required(&payload.name, "name")?;
    let email = required(&payload.email, "email")?;
    let password = required_password(&payload.password, "password")?;
    let confirm_password = required_password(&payload.confirm_password, "confirmPassword")?;

    validate_name(name)?;
    let email = normalize_email(email)?;
    validate_password_policy(password).map_err(|msg| ApiError::validation("password", msg))?;
    if password != confirm_password {
        return Err(ApiError::validation(
            "confirmPassword",
            "Passwords do not match",
        ));
    }

    let email_exists = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to check email")?
        .is_some();
    if email_exists {
        return Err(ApiError::conflict(
            "Email already exists, choose other email please",
        ));
    }

    let password_hash = hash_password(password).await.db_err("Failed to hash password")?;
    let uuid = uuid::Uuid::new_v4().to_string();

    let result = state
        .db
        .users()
        .create(&NewUser {
            uuid: &uuid,
            name,
            email: &email,
            password_hash: &password_hash,
        })
        .await;

    match result {
        Ok(_) => {}
        // Registered concurrently between the check and the insert
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict(
                "Email already exists, choose other email please",
            ));
        }
        Err(e) => return Err(ApiError::internal("Failed to create user", e)),
    }

    info!(user = %uuid, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: format!("New user {} registered successfully", email),
            user: UserProfile {
                id: uuid,
                name: name.to_string(),
                email,
            },
        }),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    access_token: String,
    refresh_token: String,
    user: UserProfile,
}

impl SessionResponse {
    fn new(grant: SessionGrant, message: Option<&'static str>) -> Self {
        Self {
            message,
            access_token: grant.tokens.access_token,
            refresh_token: grant.tokens.refresh_token,
            user: grant.user,
        }
    }
}

async fn login(
    State(state): State<SessionsState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let email = required(&payload.email, "email")?;
    let password = required_password(&payload.password, "password")?;

    let grant = sessions::login(&state.db, &state.jwt, email, password).await?;

    Ok(Json(SessionResponse::new(grant, Some("Login successful"))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

async fn refresh(
    State(state): State<SessionsState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let token = payload
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Refresh token is required"))?;

    let grant = sessions::refresh(&state.db, &state.jwt, token).await?;

    Ok(Json(SessionResponse::new(grant, None)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Always succeeds. The body is optional and parsed leniently.
async fn logout(State(state): State<SessionsState>, body: Bytes) -> impl IntoResponse {
    let token = serde_json::from_slice::<LogoutRequest>(&body)
        .ok()
        .and_then(|req| req.refresh_token);

    sessions::logout(&state.db, token.as_deref()).await;

    Json(MessageResponse {
        message: "Logged out successfully",
    })
}
