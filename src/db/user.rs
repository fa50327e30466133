//! User credential records.
//!
//! Besides identity and password hash, each record carries the single refresh
//! token that is currently valid for the user, and its expiry.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; set iff `refresh_token` is set.
    pub refresh_token_expires_at: Option<i64>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .finish_non_exhaustive()
    }
}

/// Fields for inserting a new user.
#[derive(Clone, Copy)]
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    /// Already normalized to lowercase.
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Optional profile changes; `None` leaves the column untouched.
#[derive(Default)]
pub struct ProfileChanges<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub password_hash: Option<&'a str>,
}

const USER_COLUMNS: &str =
    "id, uuid, name, email, password_hash, refresh_token, refresh_token_expires_at";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, name, email, password_hash) VALUES (?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// Whether an email belongs to a user other than `id`.
    pub async fn email_taken_by_other(&self, email: &str, id: i64) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
            .bind(email)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Replace the user's refresh token unconditionally (login).
    pub async fn set_refresh_token(
        &self,
        uuid: &str,
        token: &str,
        expires_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, refresh_token_expires_at = ?, updated_at = datetime('now') WHERE uuid = ?",
        )
        .bind(token)
        .bind(expires_at)
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Swap `expected` for `new_token` only if `expected` is still the stored,
    /// unexpired token. Returns false when another login, refresh or logout
    /// got there first.
    pub async fn rotate_refresh_token(
        &self,
        uuid: &str,
        expected: &str,
        new_token: &str,
        new_expires_at: i64,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, refresh_token_expires_at = ?, updated_at = datetime('now')
             WHERE uuid = ? AND refresh_token = ? AND refresh_token_expires_at > ?",
        )
        .bind(new_token)
        .bind(new_expires_at)
        .bind(uuid)
        .bind(expected)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the refresh token wherever it is the stored one (logout).
    pub async fn clear_refresh_token(&self, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL, updated_at = datetime('now') WHERE refresh_token = ?",
        )
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear refresh tokens whose expiry is at or before `now`.
    pub async fn clear_expired_refresh_tokens(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL
             WHERE refresh_token_expires_at IS NOT NULL AND refresh_token_expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Apply profile changes in a single statement.
    pub async fn update_profile(
        &self,
        id: i64,
        changes: &ProfileChanges<'_>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET
                name = COALESCE(?, name),
                email = COALESCE(?, email),
                password_hash = COALESCE(?, password_hash),
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Whether a sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
