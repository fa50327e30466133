//! Bearer-token authentication for protected API routes.
//!
//! Access tokens are short-lived and stateless: the extractor checks the
//! signature and expiry, then resolves the subject to a user record. An
//! expired token is reported separately from an invalid one so clients know
//! to refresh instead of asking the user to log in again.

mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use errors::AuthError;
pub use extractors::{Auth, bearer_token};
pub use ip::extract_client_ip;
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
