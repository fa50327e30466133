//! Local inspection of access tokens.
//!
//! The client never verifies signatures; it only reads the `exp` claim to
//! decide whether a stored token is worth sending.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: u64,
}

/// Read the `exp` claim (Unix seconds) from a JWT without verifying it.
pub fn expires_at(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    // Some encoders pad; the JWT form does not.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<ExpiryClaim>(&bytes)
        .ok()
        .map(|claim| claim.exp)
}

/// Whether the token is past its expiry at `now`. Undecodable tokens count
/// as expired.
pub fn is_token_expired(token: &str, now: u64) -> bool {
    expires_at(token).is_none_or(|exp| exp <= now)
}
