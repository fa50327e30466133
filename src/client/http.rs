//! HTTP client with bearer attachment and refresh-on-401.
//!
//! Each logical request moves through [`RequestPhase`]: it is sent once with
//! the current access token, and on a 401 the client refreshes (sharing one
//! in-flight refresh between all callers) and retries exactly once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::{Method, StatusCode, multipart};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::error::ClientError;
use super::session::{Session, SessionContext, User};

/// Default timeout for every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root; endpoint paths are resolved against it.
    pub base_url: Url,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Where a logical request is in its refresh-and-retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// First attempt with the stored token.
    Normal,
    /// Got a 401, waiting on a refresh.
    Refreshing,
    /// Second attempt. Another 401 is final.
    Retried,
}

/// A file attached as multipart form data.
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// Sent as multipart; keeps its own content type.
    Upload(Upload),
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Session, ClientError>>>;

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionContext>,
    in_flight_refresh: Mutex<Option<RefreshFuture>>,
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    user: User,
}

impl From<SessionResponse> for Session {
    fn from(r: SessionResponse) -> Self {
        Session {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            user: r.user,
        }
    }
}

#[derive(Deserialize)]
struct UserResponse {
    user: User,
}

/// Registration form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Profile changes. `current_password` is always required by the server.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub current_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_new_password: Option<String>,
}

impl ApiClient {
    pub fn new(config: ClientConfig, session: Arc<SessionContext>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::from)?;

        // Without a trailing slash, Url::join replaces the last path segment
        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                session,
                in_flight_refresh: Mutex::new(None),
            }),
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.inner
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Network {
                message: format!("invalid request path {}: {}", path, e),
                retriable: false,
            })
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: Url,
        body: &RequestBody,
        access_token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.inner.http.request(method.clone(), url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Upload(upload) => {
                let part = multipart::Part::bytes(upload.bytes.clone())
                    .file_name(upload.file_name.clone())
                    .mime_str(&upload.mime)?;
                request.multipart(multipart::Form::new().part(upload.field.clone(), part))
            }
        };
        Ok(request.send().await?)
    }

    /// Send a request through the interceptor. Non-success statuses become
    /// [`ClientError::Api`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.url(path)?;
        let mut phase = RequestPhase::Normal;

        loop {
            let sent_token = self.inner.session.access_token();
            let response = self
                .dispatch(&method, url.clone(), &body, sent_token.as_deref())
                .await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                if response.status().is_success() {
                    return Ok(response);
                }
                return Err(ClientError::from_response(response).await);
            }

            let unauthorized = ClientError::from_response(response).await;
            if phase != RequestPhase::Normal {
                return Err(unauthorized);
            }

            phase = RequestPhase::Refreshing;
            debug!(path = %path, ?phase, code = ?unauthorized.code(), "Got 401");

            // Someone else already refreshed while this request was in flight
            let current_token = self.inner.session.access_token();
            let already_replaced = current_token.is_some() && current_token != sent_token;

            if !already_replaced {
                if let Err(e) = self.refresh().await {
                    debug!(path = %path, error = %e, "Refresh failed, giving up on request");
                    return Err(unauthorized);
                }
            }

            phase = RequestPhase::Retried;
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send(Method::GET, path, RequestBody::Empty).await?;
        Self::decode(response).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let value = serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let response = self
            .send(Method::POST, path, RequestBody::Json(value))
            .await?;
        Self::decode(response).await
    }

    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        upload: Upload,
    ) -> Result<T, ClientError> {
        let response = self
            .send(Method::POST, path, RequestBody::Upload(upload))
            .await?;
        Self::decode(response).await
    }

    /// POST to an auth endpoint. These bypass the refresh interceptor: a 401
    /// here is an answer, not a stale token.
    async fn post_unauthenticated<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .inner
            .http
            .post(self.url(path)?)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        Self::decode(response).await
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, registration: &Registration) -> Result<User, ClientError> {
        let response: UserResponse = self.post_unauthenticated("register", registration).await?;
        Ok(response.user)
    }

    /// Log in and adopt the returned session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let response: SessionResponse = self
            .post_unauthenticated(
                "login",
                &serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        let session = Session::from(response);
        self.inner.session.establish(session.clone())?;
        Ok(session)
    }

    /// Tell the server to drop a refresh token. The server always answers
    /// success; errors here are transport failures.
    pub async fn logout_remote(&self, refresh_token: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .post_unauthenticated(
                "logout",
                &serde_json::json!({ "refreshToken": refresh_token }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_profile(&self) -> Result<User, ClientError> {
        let response: UserResponse = self.get_json("profile").await?;
        Ok(response.user)
    }

    /// Update the signed-in user's profile and store the result.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ClientError> {
        let id = self
            .inner
            .session
            .current()
            .ok_or(ClientError::NotAuthenticated)?
            .user
            .id;
        let response: UserResponse = self.post_json(&format!("profile/{}", id), update).await?;
        self.inner.session.update_user(response.user.clone())?;
        Ok(response.user)
    }

    /// Exchange the stored refresh token for a new session.
    ///
    /// Concurrent callers share one refresh. It runs on its own task, so it
    /// completes and persists its result even if every caller goes away.
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        let refresh = {
            let mut slot = self
                .inner
                .in_flight_refresh
                .lock()
                .map_err(|_| ClientError::Storage("refresh lock poisoned".into()))?;
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let client = self.clone();
                    let task = tokio::spawn(async move {
                        let result = client.run_refresh().await;
                        if let Ok(mut slot) = client.inner.in_flight_refresh.lock() {
                            *slot = None;
                        }
                        result
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ClientError::Network {
                                message: format!("refresh task failed: {}", e),
                                retriable: true,
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        let result = refresh.clone().await;

        // The task clears the slot itself; this covers a task that died early
        if let Ok(mut slot) = self.inner.in_flight_refresh.lock() {
            if slot.as_ref().is_some_and(|s| s.ptr_eq(&refresh)) {
                *slot = None;
            }
        }

        result
    }

    async fn run_refresh(&self) -> Result<Session, ClientError> {
        let session = &self.inner.session;
        let refresh_token = session.refresh_token().ok_or(ClientError::NotAuthenticated)?;

        let result: Result<SessionResponse, ClientError> = self
            .post_unauthenticated(
                "refresh",
                &serde_json::json!({ "refreshToken": refresh_token }),
            )
            .await;

        match result {
            Ok(response) => {
                let new_session = Session::from(response);
                session.establish(new_session.clone())?;
                debug!(user = %new_session.user.id, "Session refreshed");
                Ok(new_session)
            }
            Err(e) if e.is_retriable() => {
                warn!(error = %e, "Refresh failed, keeping session for retry");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Refresh rejected, ending session");
                if let Err(te) = session.teardown_if_current(&refresh_token) {
                    warn!(error = %te, "Failed to clear local session");
                }
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.logout_remote(&refresh_token).await {
                        debug!(error = %e, "Best-effort logout after failed refresh");
                    }
                });
                Err(e)
            }
        }
    }
}
