//! Profile endpoints for the authenticated user.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, normalize_email, required_password, validate_name};
use crate::auth::Auth;
use crate::db::{Database, ProfileChanges, is_unique_violation};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::password::{hash_password, validate_password_policy, verify_password};
use crate::sessions::UserProfile;

#[derive(Clone)]
pub struct ProfileState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(ProfileState);

pub fn router(state: ProfileState) -> Router {
    Router::new()
        .route("/profile", get(get_profile))
        .route("/profile/{id}", post(update_profile))
        .with_state(state)
}

#[derive(Serialize)]
struct ProfileResponse {
    user: UserProfile,
}

async fn get_profile(Auth(auth): Auth) -> impl IntoResponse {
    Json(ProfileResponse {
        user: UserProfile::from(&auth.user),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    name: Option<String>,
    email: Option<String>,
    current_password: Option<String>,
    new_password: Option<String>,
    confirm_new_password: Option<String>,
}

#[derive(Serialize)]
struct UpdateProfileResponse {
    message: &'static str,
    user: UserProfile,
}

/// Non-empty trimmed value, or None when absent or blank.
fn provided(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn update_profile(
    State(state): State<ProfileState>,
    Auth(auth): Auth,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // Other accounts are indistinguishable from missing ones
    if id != auth.uuid() {
        return Err(ApiError::not_found("User not found"));
    }

    let Json(payload) = payload?;
    let user = &auth.user;

    let current_password = required_password(&payload.current_password, "currentPassword")?;
    let matches = verify_password(current_password, &user.password_hash)
        .await
        .db_err("Failed to verify password")?;
    if !matches {
        return Err(ApiError::invalid_credentials("Current password is invalid"));
    }

    let name = match provided(&payload.name) {
        Some(name) => {
            validate_name(name)?;
            (name != user.name).then_some(name)
        }
        None => None,
    };

    let email = match provided(&payload.email) {
        Some(email) => {
            let email = normalize_email(email)?;
            if email == user.email {
                None
            } else {
                let taken = state
                    .db
                    .users()
                    .email_taken_by_other(&email, user.id)
                    .await
                    .db_err("Failed to check email")?;
                if taken {
                    return Err(ApiError::conflict(
                        "Email is already in use. Please choose a different one.",
                    ));
                }
                Some(email)
            }
        }
        None => None,
    };

    let password_hash = match payload.new_password.as_deref().filter(|p| !p.is_empty()) {
        Some(new_password) => {
            validate_password_policy(new_password)
                .map_err(|msg| ApiError::validation("newPassword", msg))?;
            if payload.confirm_new_password.as_deref() != Some(new_password) {
                return Err(ApiError::validation(
                    "confirmNewPassword",
                    "Passwords do not match",
                ));
            }
            Some(hash_password(new_password).await.db_err("Failed to hash password")?)
        }
        None => None,
    };

    let changes = ProfileChanges {
        name,
        email: email.as_deref(),
        password_hash: password_hash.as_deref(),
    };

    if let Err(e) = state.db.users().update_profile(user.id, &changes).await {
        if is_unique_violation(&e) {
            return Err(ApiError::conflict(
                "Email is already in use. Please choose a different one.",
            ));
        }
        return Err(ApiError::internal("Failed to update profile", e));
    }

    info!(
        user = %user.uuid,
        name_changed = changes.name.is_some(),
        email_changed = changes.email.is_some(),
        password_changed = changes.password_hash.is_some(),
        "Profile updated"
    );

    Ok(Json(UpdateProfileResponse {
        message: "Profile updated successfully",
        user: UserProfile {
            id: user.uuid.clone(),
            name: changes.name.unwrap_or(&user.name).to_string(),
            email: changes.email.unwrap_or(&user.email).to_string(),
        },
    }))
}
