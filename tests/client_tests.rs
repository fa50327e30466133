//! End-to-end tests for the client against a live server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use jknotes::{
    client::{
        ACCESS_TOKEN_KEY, ApiClient, AuthController, ClientConfig, MemoryStorage, ProfileUpdate,
        REFRESH_TOKEN_KEY, Registration, Session, SessionContext, Settings, Storage, Theme,
        USER_KEY,
    },
    db::Database,
    jwt::{TokenLifetimes, unix_now},
    start_server,
};
use url::Url;

struct TestServer {
    db: Database,
    base_url: Url,
}

async fn spawn_server() -> TestServer {
    let db = Database::open(":memory:").await.unwrap();
    let (_handle, addr) = start_server(test_config(db.clone()), 0).await.unwrap();
    TestServer {
        db,
        base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
    }
}

fn client(base_url: &Url, storage: Arc<MemoryStorage>) -> ApiClient {
    let session = Arc::new(SessionContext::new(storage));
    ApiClient::new(ClientConfig::new(base_url.clone()), session).unwrap()
}

fn registration(name: &str, email: &str) -> Registration {
    Registration {
        name: name.into(),
        email: email.into(),
        password: PASSWORD.into(),
        confirm_password: PASSWORD.into(),
    }
}

/// Register and log in through the client.
async fn signed_in_client(server: &TestServer, storage: Arc<MemoryStorage>) -> ApiClient {
    let api = client(&server.base_url, storage);
    api.register(&registration("Alice", "a@example.com"))
        .await
        .unwrap();
    api.login("a@example.com", PASSWORD).await.unwrap();
    api
}

/// Swap the stored access token for one that expired long ago.
fn expire_access_token(api: &ApiClient) -> Session {
    let session = api.session().current().unwrap();
    let past = unix_now().unwrap() - 2 * TokenLifetimes::default().access_secs();
    let stale = jwt_config()
        .issue_token_pair_at(&session.user.id, past)
        .unwrap();
    let expired = Session {
        access_token: stale.access_token,
        ..session
    };
    api.session().establish(expired.clone()).unwrap();
    expired
}

// =============================================================================
// Interceptor
// =============================================================================

#[tokio::test]
async fn test_authenticated_request() {
    let server = spawn_server().await;
    let api = signed_in_client(&server, Arc::new(MemoryStorage::new())).await;

    let user = api.get_profile().await.unwrap();

    assert_eq!(user.email, "a@example.com");
    assert_eq!(user, api.session().current().unwrap().user);
}

#[tokio::test]
async fn test_expired_access_token_is_refreshed_and_retried() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let api = signed_in_client(&server, storage.clone()).await;
    let expired = expire_access_token(&api);

    let user = api.get_profile().await.unwrap();
    assert_eq!(user.name, "Alice");

    let current = api.session().current().unwrap();
    assert_ne!(current.access_token, expired.access_token);
    assert_ne!(current.refresh_token, expired.refresh_token);

    // Rotated pair is persisted on both sides
    assert_eq!(
        storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
        Some(current.refresh_token.as_str())
    );
    let stored = server
        .db
        .users()
        .get_by_uuid(&current.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token, Some(current.refresh_token));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let server = spawn_server().await;
    let api = signed_in_client(&server, Arc::new(MemoryStorage::new())).await;
    let expired = expire_access_token(&api);

    let results = futures::future::join_all((0..5).map(|_| {
        let api = api.clone();
        async move { api.get_profile().await }
    }))
    .await;

    for result in results {
        assert!(result.is_ok(), "request failed: {:?}", result);
    }

    // A second rotation from the same token would have been rejected and
    // torn the session down
    let current = api.session().current().unwrap();
    assert_ne!(current.refresh_token, expired.refresh_token);
    let stored = server
        .db
        .users()
        .get_by_uuid(&current.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token, Some(current.refresh_token));
}

#[tokio::test]
async fn test_rejected_refresh_ends_session() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let api = signed_in_client(&server, storage.clone()).await;
    let expired = expire_access_token(&api);

    // Revoked server-side, e.g. by a logout elsewhere
    server
        .db
        .users()
        .clear_refresh_token(&expired.refresh_token)
        .await
        .unwrap();

    let err = api.get_profile().await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.code(), Some("TOKEN_EXPIRED"));
    assert!(api.session().current().is_none());
    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
        assert_eq!(storage.get(key).unwrap(), None, "{key} left behind");
    }
}

#[tokio::test]
async fn test_session_changes_are_broadcast() {
    let server = spawn_server().await;
    let api = client(&server.base_url, Arc::new(MemoryStorage::new()));
    let mut changes = api.session().subscribe();
    assert!(changes.borrow().is_none());

    api.register(&registration("Alice", "a@example.com"))
        .await
        .unwrap();
    api.login("a@example.com", PASSWORD).await.unwrap();

    assert!(changes.has_changed().unwrap());
    assert_eq!(
        changes.borrow_and_update().as_ref().map(|s| s.user.name.clone()),
        Some("Alice".to_string())
    );
}

// =============================================================================
// Controller
// =============================================================================

#[tokio::test]
async fn test_register_logs_in() {
    let server = spawn_server().await;
    let controller = AuthController::new(client(&server.base_url, Arc::new(MemoryStorage::new())));

    let state = controller
        .register(registration("Alice", "a@example.com"))
        .await;

    assert!(state.is_authenticated());
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
    assert_eq!(state.session.unwrap().user.email, "a@example.com");
}

#[tokio::test]
async fn test_register_conflict_reports_message() {
    let server = spawn_server().await;
    let controller = AuthController::new(client(&server.base_url, Arc::new(MemoryStorage::new())));
    controller
        .register(registration("Alice", "a@example.com"))
        .await;
    controller.logout().await;

    let state = controller
        .register(registration("Alice", "a@example.com"))
        .await;

    assert!(!state.is_authenticated());
    assert_eq!(
        state.error.as_deref(),
        Some("Email already exists, choose other email please")
    );
}

#[tokio::test]
async fn test_login_failure_reports_message() {
    let server = spawn_server().await;
    let controller = AuthController::new(client(&server.base_url, Arc::new(MemoryStorage::new())));

    let state = controller.login("nobody@example.com", PASSWORD).await;

    assert!(!state.is_authenticated());
    assert_eq!(state.error.as_deref(), Some("Email or password is incorrect"));

    controller.clear_error();
    assert_eq!(controller.state().error, None);
}

#[tokio::test]
async fn test_bootstrap_refreshes_expired_session() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let first = signed_in_client(&server, storage.clone()).await;
    let expired = expire_access_token(&first);
    drop(first);

    // App restart over the same storage
    let controller = AuthController::new(client(&server.base_url, storage));
    let state = controller.bootstrap().await;

    assert!(state.is_authenticated());
    assert_eq!(state.error, None);
    let session = state.session.unwrap();
    assert_ne!(session.access_token, expired.access_token);
    assert_ne!(session.refresh_token, expired.refresh_token);
}

#[tokio::test]
async fn test_bootstrap_with_revoked_session_logs_out_quietly() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let first = signed_in_client(&server, storage.clone()).await;
    let expired = expire_access_token(&first);
    server
        .db
        .users()
        .clear_refresh_token(&expired.refresh_token)
        .await
        .unwrap();

    let controller = AuthController::new(client(&server.base_url, storage.clone()));
    let state = controller.bootstrap().await;

    assert!(!state.is_authenticated());
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_bootstrap_without_session() {
    let server = spawn_server().await;
    let controller = AuthController::new(client(&server.base_url, Arc::new(MemoryStorage::new())));

    let state = controller.bootstrap().await;

    assert!(!state.is_authenticated());
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let server = spawn_server().await;
    let api = signed_in_client(&server, Arc::new(MemoryStorage::new())).await;
    let session = api.session().current().unwrap();
    let controller = AuthController::new(api);

    let state = controller.logout().await;

    assert!(!state.is_authenticated());
    let stored = server
        .db
        .users()
        .get_by_uuid(&session.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token, None);
}

#[tokio::test]
async fn test_logout_clears_locally_when_server_unreachable() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let signed_in = signed_in_client(&server, storage.clone()).await;
    signed_in
        .session()
        .save_settings(&Settings { theme: Theme::Dark })
        .unwrap();

    // Nothing listens on port 1
    let unreachable = Url::parse("http://127.0.0.1:1").unwrap();
    let mut config = ClientConfig::new(unreachable);
    config.timeout = Duration::from_secs(2);
    let context = Arc::new(SessionContext::new(storage.clone()));
    context.restore().unwrap();
    let controller = AuthController::new(ApiClient::new(config, context.clone()).unwrap());
    assert!(controller.state().is_authenticated());

    let state = controller.logout().await;

    assert!(!state.is_authenticated());
    assert_eq!(state.error, None);
    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
        assert_eq!(storage.get(key).unwrap(), None, "{key} left behind");
    }
    assert_eq!(context.settings().theme, Theme::Dark);
}

#[tokio::test]
async fn test_update_profile_updates_stored_user() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let controller = AuthController::new(signed_in_client(&server, storage.clone()).await);

    let state = controller
        .update_profile(ProfileUpdate {
            name: Some("Alice Smith".into()),
            current_password: PASSWORD.into(),
            ..Default::default()
        })
        .await;

    assert_eq!(state.error, None);
    assert_eq!(state.session.unwrap().user.name, "Alice Smith");
    let stored: serde_json::Value =
        serde_json::from_str(&storage.get(USER_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored["name"], "Alice Smith");

    let state = controller
        .update_profile(ProfileUpdate {
            name: Some("Mallory".into()),
            current_password: "Wr0ngPassword".into(),
            ..Default::default()
        })
        .await;

    // A wrong current password is a 401 that refresh cannot fix; the session stays
    assert_eq!(state.error.as_deref(), Some("Current password is invalid"));
    assert_eq!(state.session.unwrap().user.name, "Alice Smith");
}
