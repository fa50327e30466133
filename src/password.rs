//! Password hashing via bcrypt and the account password policy.

use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::LazyLock;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Hash verified against when the email is unknown, so a failed login costs
/// the same whether or not the account exists.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    let filler: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    bcrypt::hash(filler, BCRYPT_COST).unwrap_or_default()
});

/// Errors from hashing or verifying a password.
#[derive(Debug)]
pub enum PasswordError {
    Bcrypt(bcrypt::BcryptError),
    /// The blocking task panicked or was cancelled.
    Task(tokio::task::JoinError),
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Bcrypt(e) => write!(f, "bcrypt: {}", e),
            PasswordError::Task(e) => write!(f, "bcrypt task failed: {}", e),
        }
    }
}

impl std::error::Error for PasswordError {}

/// Run bcrypt work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, PasswordError>
where
    F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(PasswordError::Task)?
        .map_err(PasswordError::Bcrypt)
}

/// Hash a password with bcrypt (cost 10).
pub async fn hash_password(password: &str) -> Result<String, PasswordError> {
    let password = password.to_owned();
    blocking(move || bcrypt::hash(password, BCRYPT_COST)).await
}

/// Verify a password against a bcrypt hash.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    blocking(move || bcrypt::verify(password, &hash)).await
}

/// Burn one bcrypt verification for a login attempt against an unknown email.
pub async fn verify_against_dummy(password: &str) {
    let password = password.to_owned();
    let _ = blocking(move || bcrypt::verify(password, &DUMMY_HASH)).await;
}

/// Check the password policy: at least 6 characters with an uppercase
/// letter, a lowercase letter and a digit.
pub fn validate_password_policy(password: &str) -> Result<(), &'static str> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(
            "Password must be at least 6 characters and contain an uppercase letter, a lowercase letter, and a number",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("Passw0rd").await.unwrap();
        assert_ne!(hash, "Passw0rd");
        assert!(verify_password("Passw0rd", &hash).await.unwrap());
        assert!(!verify_password("passw0rd", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_is_salted() {
        let a = hash_password("Passw0rd").await.unwrap();
        let b = hash_password("Passw0rd").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_malformed_hash_is_bcrypt_error() {
        let result = verify_password("Passw0rd", "not-a-bcrypt-hash").await;
        assert!(matches!(result, Err(PasswordError::Bcrypt(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_hashing_leaves_runtime_responsive() {
        // On a single worker, a ticker only advances while bcrypt is off-thread
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            })
        };

        hash_password("Passw0rd").await.unwrap();
        ticker.abort();

        assert!(ticks.load(std::sync::atomic::Ordering::Relaxed) > 1);
    }

    #[test]
    fn test_policy_accepts_valid() {
        assert!(validate_password_policy("Passw0rd").is_ok());
        assert!(validate_password_policy("aB3xyz").is_ok());
    }

    #[test]
    fn test_policy_rejects_short() {
        assert!(validate_password_policy("aB3").is_err());
        assert!(validate_password_policy("aB3xy").is_err());
    }

    #[test]
    fn test_policy_requires_each_class() {
        assert!(validate_password_policy("password1").is_err());
        assert!(validate_password_policy("PASSWORD1").is_err());
        assert!(validate_password_policy("Password").is_err());
    }
}
