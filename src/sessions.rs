//! Server-side session lifecycle: login, refresh with rotation, logout.
//!
//! Each user holds at most one valid refresh token. Login replaces it,
//! refresh swaps it atomically for a new one, logout clears it. A refresh
//! token that is well formed but no longer the stored one is rejected.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, User};
use crate::jwt::{JwtConfig, JwtError, TokenPair, unix_now};
use crate::password::{PasswordError, verify_against_dummy, verify_password};

/// Uniform message for every failed login.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Email or password is incorrect";

/// Public projection of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.uuid.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Tokens plus the user they were issued to.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub tokens: TokenPair,
    pub user: UserProfile,
}

#[derive(Debug)]
pub enum SessionError {
    /// Unknown email or wrong password; callers must not tell them apart.
    InvalidCredentials,
    /// Refresh token failed verification, was superseded, or has expired.
    InvalidRefreshToken,
    Database(sqlx::Error),
    Token(JwtError),
    Password(PasswordError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidCredentials => write!(f, "Invalid credentials"),
            SessionError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            SessionError::Database(e) => write!(f, "Database error: {}", e),
            SessionError::Token(e) => write!(f, "Token error: {}", e),
            SessionError::Password(e) => write!(f, "Password error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Database(e)
    }
}

impl From<JwtError> for SessionError {
    fn from(e: JwtError) -> Self {
        SessionError::Token(e)
    }
}

impl From<PasswordError> for SessionError {
    fn from(e: PasswordError) -> Self {
        SessionError::Password(e)
    }
}

fn to_db_time(secs: u64) -> Result<i64, SessionError> {
    i64::try_from(secs).map_err(|_| SessionError::Token(JwtError::ExpiryOverflow))
}

/// Verify credentials, issue a token pair and make its refresh token the
/// user's only valid one.
pub async fn login(
    db: &Database,
    jwt: &JwtConfig,
    email: &str,
    password: &str,
) -> Result<SessionGrant, SessionError> {
    let email = email.trim().to_lowercase();

    let Some(user) = db.users().get_by_email(&email).await? else {
        verify_against_dummy(password).await;
        return Err(SessionError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash).await? {
        return Err(SessionError::InvalidCredentials);
    }

    let tokens = jwt.issue_token_pair(&user.uuid)?;
    db.users()
        .set_refresh_token(
            &user.uuid,
            &tokens.refresh_token,
            to_db_time(tokens.refresh_expires_at)?,
        )
        .await?;

    info!(user = %user.uuid, "User logged in");
    Ok(SessionGrant {
        user: UserProfile::from(&user),
        tokens,
    })
}

/// Exchange a refresh token for a new pair, invalidating the presented one.
///
/// Any failure is terminal for this token: the client must log in again.
pub async fn refresh(
    db: &Database,
    jwt: &JwtConfig,
    presented: &str,
) -> Result<SessionGrant, SessionError> {
    let claims = jwt.validate_refresh_token(presented).map_err(|e| {
        debug!(error = %e, "Rejected refresh token");
        SessionError::InvalidRefreshToken
    })?;

    let user = db
        .users()
        .get_by_uuid(&claims.sub)
        .await?
        .ok_or(SessionError::InvalidRefreshToken)?;

    let now = to_db_time(unix_now()?)?;
    let is_current = user.refresh_token.as_deref() == Some(presented)
        && user.refresh_token_expires_at.is_some_and(|exp| exp > now);
    if !is_current {
        debug!(user = %user.uuid, "Refresh token is not the current one");
        return Err(SessionError::InvalidRefreshToken);
    }

    let tokens = jwt.issue_token_pair(&user.uuid)?;

    // Lost the race to a concurrent login, refresh or logout.
    let rotated = db
        .users()
        .rotate_refresh_token(
            &user.uuid,
            presented,
            &tokens.refresh_token,
            to_db_time(tokens.refresh_expires_at)?,
            now,
        )
        .await?;
    if !rotated {
        debug!(user = %user.uuid, "Refresh token superseded during rotation");
        return Err(SessionError::InvalidRefreshToken);
    }

    debug!(user = %user.uuid, "Refresh token rotated");
    Ok(SessionGrant {
        user: UserProfile::from(&user),
        tokens,
    })
}

/// Clear the refresh token if it is some user's current one.
///
/// Never fails: whatever happens, the caller's session is over.
pub async fn logout(db: &Database, refresh_token: Option<&str>) {
    let Some(token) = refresh_token.map(str::trim).filter(|t| !t.is_empty()) else {
        return;
    };

    match db.users().clear_refresh_token(token).await {
        Ok(true) => info!("User logged out"),
        Ok(false) => debug!("Logout with a refresh token that is not current"),
        Err(e) => warn!(error = %e, "Failed to clear refresh token on logout"),
    }
}
