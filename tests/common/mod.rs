#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode},
};
use jknotes::{
    ServerConfig, create_app,
    db::Database,
    jwt::{JwtConfig, TokenLifetimes},
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";
pub const PASSWORD: &str = "Passw0rd";

pub fn jwt_config() -> JwtConfig {
    JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET, TokenLifetimes::default())
}

/// Server config with rate limiting off and default lifetimes.
pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        lifetimes: TokenLifetimes::default(),
        ip_extractor: None,
        rate_limit: false,
    }
}

/// Create a test app and return (app, db, jwt_config).
pub async fn create_test_app() -> (Router, Database, JwtConfig) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone()));
    (app, db, jwt_config())
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_json_with_bearer(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_with_bearer(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// Send a request and return the status with the raw body.
pub async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

/// Send a request and parse the body as JSON (Null if empty or not JSON).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send_raw(app, request).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Register a user through the API and return the response body.
pub async fn register_user(app: &Router, name: &str, email: &str) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/register",
            json!({
                "name": name,
                "email": email,
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    body
}

/// Log in through the API and return the response body.
pub async fn login_user(app: &Router, email: &str) -> Value {
    let (status, body) = send(
        app,
        post_json("/login", json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body
}

pub fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {field} in {body}"))
}
