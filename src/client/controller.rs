//! Session state transitions for the UI.
//!
//! Operations never return errors to the caller. Failures land in
//! [`SessionState::error`] as a message meant for display.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use super::error::ClientError;
use super::http::{ApiClient, ProfileUpdate, Registration};
use super::session::Session;
use super::token::is_token_expired;
use crate::jwt::unix_now;

/// Snapshot of what the UI needs to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Default)]
struct Status {
    is_loading: bool,
    error: Option<String>,
}

pub struct AuthController {
    api: ApiClient,
    status: Mutex<Status>,
}

impl AuthController {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            status: Mutex::new(Status::default()),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state. The session always reflects the shared context, so a
    /// logout forced by the HTTP client shows up here too.
    pub fn state(&self) -> SessionState {
        let status = self.status();
        SessionState {
            session: self.api.session().current(),
            is_loading: status.is_loading,
            error: status.error.clone(),
        }
    }

    fn begin(&self) {
        let mut status = self.status();
        status.is_loading = true;
        status.error = None;
    }

    fn finish(&self, error: Option<&ClientError>) -> SessionState {
        {
            let mut status = self.status();
            status.is_loading = false;
            status.error = error.map(ClientError::user_message);
        }
        self.state()
    }

    /// Restore the persisted session at app start. An expired access token
    /// gets one refresh attempt; if that fails the session is dropped.
    /// Never reports an error: the worst case is simply being logged out.
    pub async fn bootstrap(&self) -> SessionState {
        self.begin();
        let session = self.api.session();

        let restored = match session.restore() {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "Failed to restore session");
                None
            }
        };

        if let Some(restored) = restored {
            let now = unix_now().unwrap_or(u64::MAX);
            if is_token_expired(&restored.access_token, now) {
                debug!("Stored access token expired, refreshing");
                if let Err(e) = self.api.refresh().await {
                    debug!(error = %e, "Refresh on startup failed");
                    if let Err(e) = session.teardown() {
                        warn!(error = %e, "Failed to clear local session");
                    }
                }
            }
        }

        self.finish(None)
    }

    pub async fn login(&self, email: &str, password: &str) -> SessionState {
        self.begin();
        let result = self.api.login(email, password).await;
        self.finish(result.err().as_ref())
    }

    /// Create the account, then log in with the same credentials.
    pub async fn register(&self, registration: Registration) -> SessionState {
        self.begin();
        let result = match self.api.register(&registration).await {
            Ok(_) => self
                .api
                .login(&registration.email, &registration.password)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        self.finish(result.err().as_ref())
    }

    /// Notify the server best-effort, then clear local state regardless.
    pub async fn logout(&self) -> SessionState {
        self.begin();
        let session = self.api.session();

        if let Some(refresh_token) = session.refresh_token() {
            if let Err(e) = self.api.logout_remote(&refresh_token).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }
        if let Err(e) = session.teardown() {
            warn!(error = %e, "Failed to clear local session");
        }

        self.finish(None)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> SessionState {
        self.begin();
        let result = self.api.update_profile(&update).await;
        self.finish(result.err().as_ref())
    }

    pub fn clear_error(&self) {
        self.status().error = None;
    }
}
