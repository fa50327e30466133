//! Authentication user types.

use crate::db::User;
use crate::jwt::AccessClaims;

/// The caller resolved from a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
    /// The user record the token's subject resolved to
    pub user: User,
}

impl AuthenticatedUser {
    pub fn uuid(&self) -> &str {
        &self.user.uuid
    }
}
