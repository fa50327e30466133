//! Client side of the session protocol.
//!
//! A [`SessionContext`] owns the tokens and user and mirrors them to
//! [`Storage`]. [`ApiClient`] attaches the access token to requests and
//! refreshes it on 401. [`AuthController`] drives login, registration,
//! logout and app-start restore on top of both.

mod controller;
mod error;
mod http;
mod session;
mod storage;
mod token;
mod validation;

pub use controller::{AuthController, SessionState};
pub use error::ClientError;
pub use http::{
    ApiClient, ClientConfig, DEFAULT_TIMEOUT, ProfileUpdate, Registration, RequestBody,
    RequestPhase, Upload,
};
pub use session::{Session, SessionContext, User};
pub use storage::{
    ACCESS_TOKEN_KEY, FileStorage, LocalState, MemoryStorage, REFRESH_TOKEN_KEY, SETTINGS_KEY,
    Settings, Storage, Theme, USER_KEY,
};
pub use token::{expires_at, is_token_expired};
pub use validation::{PasswordChangeError, validate_password_change};
