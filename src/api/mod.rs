mod error;
mod profile;
mod sessions;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitState;

pub use error::ApiError;
pub use profile::ProfileState;
pub use sessions::SessionsState;

/// Create the API router. Routes are mounted at the root.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    rate_limit: Option<RateLimitState>,
) -> Router {
    let sessions_state = sessions::SessionsState {
        db: db.clone(),
        jwt: jwt.clone(),
    };

    let profile_state = profile::ProfileState { db, jwt };

    Router::new()
        .merge(sessions::router(sessions_state, rate_limit))
        .merge(profile::router(profile_state))
}
