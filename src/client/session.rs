//! The client's session context.
//!
//! One `SessionContext` is created at app start and shared by the HTTP
//! client and the auth controller. It mirrors every change to durable
//! storage and broadcasts the current session to subscribers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::ClientError;
use super::storage::{LocalState, Settings, Storage};

/// The signed-in user as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Tokens and user, present together or not at all.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

pub struct SessionContext {
    local: LocalState,
    current: watch::Sender<Option<Session>>,
}

impl SessionContext {
    /// Create an empty context over the given storage. Call
    /// [`restore`](Self::restore) to load a persisted session.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            local: LocalState::new(storage),
            current,
        }
    }

    /// Load the persisted session into memory.
    pub fn restore(&self) -> Result<Option<Session>, ClientError> {
        let session = self.local.load_session()?;
        self.current.send_replace(session.clone());
        Ok(session)
    }

    /// Adopt a new session, persisting it first.
    pub fn establish(&self, session: Session) -> Result<(), ClientError> {
        self.local.save_session(&session)?;
        self.current.send_replace(Some(session));
        Ok(())
    }

    /// Replace the stored user, keeping the tokens.
    pub fn update_user(&self, user: User) -> Result<(), ClientError> {
        let session = self.current().ok_or(ClientError::NotAuthenticated)?;
        self.establish(Session { user, ..session })
    }

    /// End the session: clear the session keys from storage and memory.
    /// Memory is cleared even when storage fails.
    pub fn teardown(&self) -> Result<(), ClientError> {
        self.current.send_replace(None);
        self.local.clear_session()
    }

    /// Tear down only if `refresh_token` is still the current one.
    /// Returns whether the session was torn down.
    pub fn teardown_if_current(&self, refresh_token: &str) -> Result<bool, ClientError> {
        let is_current = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|s| s.refresh_token == refresh_token);
        if is_current {
            self.teardown()?;
        }
        Ok(is_current)
    }

    /// Clear everything, settings included.
    pub fn clear_all(&self) -> Result<(), ClientError> {
        self.current.send_replace(None);
        self.local.clear_all()
    }

    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current
            .borrow()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current
            .borrow()
            .as_ref()
            .map(|s| s.refresh_token.clone())
    }

    /// Watch session changes (login, refresh, logout).
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub fn settings(&self) -> Settings {
        self.local.settings()
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), ClientError> {
        self.local.save_settings(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::storage::MemoryStorage;

    fn session(refresh: &str) -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: refresh.into(),
            user: User {
                id: "u1".into(),
                name: "Alice".into(),
                email: "a@example.com".into(),
            },
        }
    }

    #[test]
    fn test_establish_persists_and_broadcasts() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = SessionContext::new(storage.clone());
        let mut rx = ctx.subscribe();

        ctx.establish(session("r1")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&session("r1")));

        let other = SessionContext::new(storage);
        assert_eq!(other.restore().unwrap(), Some(session("r1")));
    }

    #[test]
    fn test_teardown_if_current() {
        let ctx = SessionContext::new(Arc::new(MemoryStorage::new()));
        ctx.establish(session("r2")).unwrap();

        assert!(!ctx.teardown_if_current("r1").unwrap());
        assert!(ctx.is_authenticated());

        assert!(ctx.teardown_if_current("r2").unwrap());
        assert!(!ctx.is_authenticated());
        assert!(ctx.restore().unwrap().is_none());
    }

    #[test]
    fn test_update_user_requires_session() {
        let ctx = SessionContext::new(Arc::new(MemoryStorage::new()));
        let user = session("r").user;
        assert_eq!(
            ctx.update_user(user),
            Err(ClientError::NotAuthenticated)
        );
    }
}
