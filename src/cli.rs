//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::Database;
use crate::jwt::{
    ACCESS_TOKEN_DURATION_SECS, MAX_TOKEN_LIFETIME_SECS, REFRESH_TOKEN_DURATION_SECS, TokenLifetimes,
};
use clap::Parser;
use std::net::IpAddr;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Environment variable holding the access token secret.
pub const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";

/// Environment variable holding the refresh token secret.
pub const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Trusted proxy header carrying the client IP.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    XForwardedFor,
    XRealIp,
    CfConnectingIp,
}

/// Reads the client IP from a proxy header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    header: ClientIpHeader,
}

impl IpExtractor {
    pub fn new(header: ClientIpHeader) -> Self {
        Self { header }
    }

    pub fn header_name(&self) -> &'static str {
        match self.header {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }

    /// Parse the header value into a normalized IP string.
    /// For X-Forwarded-For the last hop is used: it is the one our proxy appended.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self.header {
            ClientIpHeader::XForwardedFor => value.rsplit(',').next().unwrap_or(value),
            _ => value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        Self::new(header)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "jknotes", about = "JK Notes API server")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "jknotes.db")]
    pub database: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = ACCESS_TOKEN_DURATION_SECS)]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = REFRESH_TOKEN_DURATION_SECS)]
    pub refresh_ttl_secs: u64,

    /// Read the client IP from this header (only behind a trusted proxy)
    #[arg(long)]
    pub ip_header: Option<ClientIpHeader>,

    /// Disable rate limiting on login and registration
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            variable = %env_var,
            "Secret is required. Set the environment variable (recommended) or pass a secret file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            variable = %env_var,
            "Secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load both signing secrets. They must differ.
pub fn load_secrets(
    access_secret_file: Option<&str>,
    refresh_secret_file: Option<&str>,
) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, access_secret_file)?;
    let refresh = load_secret(REFRESH_SECRET_ENV, refresh_secret_file)?;

    if access == refresh {
        error!("Access and refresh token secrets must be different");
        return None;
    }

    Some((access, refresh))
}

/// Validate the configured token lifetimes.
pub fn validate_lifetimes(access_secs: u64, refresh_secs: u64) -> Option<TokenLifetimes> {
    let lifetimes = TokenLifetimes::new(access_secs, refresh_secs);
    if lifetimes.is_none() {
        error!(
            access_ttl_secs = access_secs,
            refresh_ttl_secs = refresh_secs,
            max_ttl_secs = MAX_TOKEN_LIFETIME_SECS,
            "Access token lifetime must be positive and shorter than the refresh token lifetime, which must not exceed the maximum"
        );
    }
    lifetimes
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    access_secret: String,
    refresh_secret: String,
    lifetimes: TokenLifetimes,
    ip_header: Option<ClientIpHeader>,
    no_rate_limit: bool,
) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        lifetimes,
        ip_extractor: ip_header.map(IpExtractor::from),
        rate_limit: !no_rate_limit,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
