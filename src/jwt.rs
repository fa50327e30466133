//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with different secrets, so a leaked
//! access secret cannot be used to mint refresh tokens and vice versa.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token - stateless, bearer-carried
    Access,
    /// Long-lived refresh token - mirrored on the user record
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID. Makes two refresh tokens issued in the same second differ.
    pub jti: String,
    /// Subject (user UUID)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Default access token lifetime: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound for either lifetime: 10 years. Keeps every expiry a valid
/// `i64` Unix timestamp for storage.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configured token lifetimes. The access lifetime is always shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    access_secs: u64,
    refresh_secs: u64,
}

impl TokenLifetimes {
    /// Returns `None` unless `0 < access_secs < refresh_secs <= MAX_TOKEN_LIFETIME_SECS`.
    pub fn new(access_secs: u64, refresh_secs: u64) -> Option<Self> {
        if access_secs == 0 || access_secs >= refresh_secs || refresh_secs > MAX_TOKEN_LIFETIME_SECS
        {
            return None;
        }
        Some(Self {
            access_secs,
            refresh_secs,
        })
    }

    pub fn access_secs(&self) -> u64 {
        self.access_secs
    }

    pub fn refresh_secs(&self) -> u64 {
        self.refresh_secs
    }
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: ACCESS_TOKEN_DURATION_SECS,
            refresh_secs: REFRESH_TOKEN_DURATION_SECS,
        }
    }
}

/// A freshly issued access + refresh token pair.
#[derive(Clone)]
pub struct TokenPair {
    /// The access JWT
    pub access_token: String,
    /// The refresh JWT
    pub refresh_token: String,
    /// Refresh token JWT ID
    pub refresh_jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Access token expiration (Unix seconds)
    pub access_expires_at: u64,
    /// Refresh token expiration (Unix seconds), mirrored on the user record
    pub refresh_expires_at: u64,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("refresh_jti", &self.refresh_jti)
            .field("issued_at", &self.issued_at)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    lifetimes: TokenLifetimes,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

/// `now + lifetime`, provided it is still a valid `i64` timestamp.
fn expiry(now: u64, lifetime: u64) -> Result<u64, JwtError> {
    now.checked_add(lifetime)
        .filter(|exp| i64::try_from(*exp).is_ok())
        .ok_or(JwtError::ExpiryOverflow)
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> JwtError {
    match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Decoding(e),
    }
}

impl JwtConfig {
    /// Create a new JWT configuration with separate access and refresh secrets.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8], lifetimes: TokenLifetimes) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Issue an access + refresh pair for a user, starting now.
    pub fn issue_token_pair(&self, user_uuid: &str) -> Result<TokenPair, JwtError> {
        self.issue_token_pair_at(user_uuid, unix_now()?)
    }

    /// Issue an access + refresh pair as if the current time were `now`.
    pub fn issue_token_pair_at(&self, user_uuid: &str, now: u64) -> Result<TokenPair, JwtError> {
        let access_expires_at = expiry(now, self.lifetimes.access_secs)?;
        let refresh_expires_at = expiry(now, self.lifetimes.refresh_secs)?;

        let access_claims = AccessClaims {
            sub: user_uuid.to_string(),
            token_type: TokenType::Access,
            iat: now,
            exp: access_expires_at,
        };

        let jti = uuid::Uuid::new_v4().to_string();
        let refresh_claims = RefreshClaims {
            jti: jti.clone(),
            sub: user_uuid.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp: refresh_expires_at,
        };

        let access_token =
            jsonwebtoken::encode(&Header::default(), &access_claims, &self.access_encoding)
                .map_err(JwtError::Encoding)?;
        let refresh_token =
            jsonwebtoken::encode(&Header::default(), &refresh_claims, &self.refresh_encoding)
                .map_err(JwtError::Encoding)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            refresh_jti: jti,
            issued_at: now,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Validate and decode an access token.
    /// A correctly signed but expired token yields `JwtError::Expired`.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.access_decoding, &strict_validation())
                .map_err(map_decode_error)?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let token_data = jsonwebtoken::decode::<RefreshClaims>(
            token,
            &self.refresh_decoding,
            &strict_validation(),
        )
        .map_err(map_decode_error)?;

        if token_data.claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Malformed token or bad signature
    Decoding(jsonwebtoken::errors::Error),
    /// Signature is valid but the token is past its expiry
    Expired,
    /// System time error
    TimeError,
    /// Issue time plus lifetime does not fit a Unix timestamp
    ExpiryOverflow,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::Expired => write!(f, "Token has expired"),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::ExpiryOverflow => write!(f, "Token expiry out of range"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
        }
    }
}

impl std::error::Error for JwtError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_SECRET: &[u8] = b"access-secret-key-for-testing-0001";
    const REFRESH_SECRET: &[u8] = b"refresh-secret-key-for-testing-0002";

    fn config() -> JwtConfig {
        JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET, TokenLifetimes::default())
    }

    #[test]
    fn test_issue_and_validate_pair() {
        let config = config();
        let pair = config.issue_token_pair("uuid-123").unwrap();

        let access = config.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(access.sub, "uuid-123");
        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(access.exp, pair.access_expires_at);

        let refresh = config.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, "uuid-123");
        assert_eq!(refresh.token_type, TokenType::Refresh);
        assert_eq!(refresh.jti, pair.refresh_jti);
        assert_eq!(refresh.exp, pair.refresh_expires_at);
    }

    #[test]
    fn test_access_expires_before_refresh() {
        let pair = config().issue_token_pair("uuid-123").unwrap();
        assert!(pair.access_expires_at < pair.refresh_expires_at);
        assert_eq!(
            pair.access_expires_at - pair.issued_at,
            ACCESS_TOKEN_DURATION_SECS
        );
        assert_eq!(
            pair.refresh_expires_at - pair.issued_at,
            REFRESH_TOKEN_DURATION_SECS
        );
    }

    #[test]
    fn test_tokens_not_interchangeable() {
        let config = config();
        let pair = config.issue_token_pair("uuid-123").unwrap();

        // Different secrets: each token fails the other's validation
        assert!(config.validate_refresh_token(&pair.access_token).is_err());
        assert!(config.validate_access_token(&pair.refresh_token).is_err());
    }

    #[test]
    fn test_same_secret_still_checks_type() {
        let config = JwtConfig::new(ACCESS_SECRET, ACCESS_SECRET, TokenLifetimes::default());
        let pair = config.issue_token_pair("uuid-123").unwrap();

        assert!(matches!(
            config.validate_access_token(&pair.refresh_token),
            Err(JwtError::Decoding(_)) | Err(JwtError::WrongTokenType)
        ));
    }

    #[test]
    fn test_invalid_token() {
        let result = config().validate_access_token("invalid-token");
        assert!(matches!(result, Err(JwtError::Decoding(_))));
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = config();
        let config2 = JwtConfig::new(
            b"another-access-secret-for-tests-9999",
            REFRESH_SECRET,
            TokenLifetimes::default(),
        );

        let pair = config1.issue_token_pair("uuid-123").unwrap();
        let result = config2.validate_access_token(&pair.access_token);
        assert!(matches!(result, Err(JwtError::Decoding(_))));
    }

    #[test]
    fn test_expired_access_token() {
        let config = config();
        let now = unix_now().unwrap();
        let pair = config
            .issue_token_pair_at("uuid-123", now - ACCESS_TOKEN_DURATION_SECS - 60)
            .unwrap();

        let result = config.validate_access_token(&pair.access_token);
        assert!(matches!(result, Err(JwtError::Expired)));

        // The refresh token from the same pair is still good
        assert!(config.validate_refresh_token(&pair.refresh_token).is_ok());
    }

    #[test]
    fn test_expired_token_with_wrong_secret_is_invalid() {
        let config = config();
        let now = unix_now().unwrap();
        let pair = config
            .issue_token_pair_at("uuid-123", now - ACCESS_TOKEN_DURATION_SECS - 60)
            .unwrap();

        let other = JwtConfig::new(
            b"another-access-secret-for-tests-9999",
            REFRESH_SECRET,
            TokenLifetimes::default(),
        );
        assert!(matches!(
            other.validate_access_token(&pair.access_token),
            Err(JwtError::Decoding(_))
        ));
    }

    #[test]
    fn test_unique_refresh_token_per_issue() {
        let config = config();
        let now = unix_now().unwrap();

        let first = config.issue_token_pair_at("uuid-123", now).unwrap();
        let second = config.issue_token_pair_at("uuid-123", now).unwrap();

        assert_ne!(first.refresh_jti, second.refresh_jti);
        assert_ne!(first.refresh_token, second.refresh_token);
    }

    #[test]
    fn test_lifetimes_validation() {
        assert!(TokenLifetimes::new(60, 3600).is_some());
        assert!(TokenLifetimes::new(3600, 3600).is_none());
        assert!(TokenLifetimes::new(7200, 3600).is_none());
        assert!(TokenLifetimes::new(0, 3600).is_none());
        assert!(TokenLifetimes::new(900, u64::MAX).is_none());
        assert!(TokenLifetimes::new(900, MAX_TOKEN_LIFETIME_SECS + 1).is_none());
        assert!(TokenLifetimes::new(900, MAX_TOKEN_LIFETIME_SECS).is_some());
    }

    #[test]
    fn test_issue_rejects_out_of_range_expiry() {
        let config = config();
        let result = config.issue_token_pair_at("uuid-123", u64::MAX - 10);
        assert!(matches!(result, Err(JwtError::ExpiryOverflow)));

        let result = config.issue_token_pair_at("uuid-123", i64::MAX as u64);
        assert!(matches!(result, Err(JwtError::ExpiryOverflow)));
    }
}
