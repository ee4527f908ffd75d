//! Account lookup
//!
//! Credential records are owned by the account database. Authentication only
//! reads them; the one write is persisting a freshly enrolled 2FA secret.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};

/// Credential record for one user
#[derive(Clone, FromRow)]
pub struct Account {
    pub username: String,
    pub email: Option<String>,
    #[sqlx(rename = "encrypted_password")]
    pub password_hash: String,
    #[sqlx(rename = "secretkey_2fa")]
    pub totp_secret: Option<String>,
}

impl Account {
    /// Enrolled secret, treating an empty column as not enrolled
    pub fn totp_secret(&self) -> Option<&str> {
        self.totp_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Label shown in authenticator apps
    pub fn totp_label(&self) -> &str {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.username)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"[redacted]")
            .field("totp_enrolled", &self.totp_secret().is_some())
            .finish()
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, username: &str) -> ApiResult<Option<Account>>;

    async fn save_totp_secret(&self, username: &str, secret: &str) -> ApiResult<()>;
}

/// Accounts table in Postgres
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_account(&self, username: &str) -> ApiResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT username, email, encrypted_password, secretkey_2fa
            FROM accounts
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn save_totp_secret(&self, username: &str, secret: &str) -> ApiResult<()> {
        let rows = sqlx::query("UPDATE accounts SET secretkey_2fa = $2 WHERE username = $1")
            .bind(username)
            .bind(secret)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(ApiError::Database(format!(
                "no account row updated for 2FA enrollment of {}",
                username
            )));
        }
        Ok(())
    }
}

/// Account store held in memory, for tests and database-less runs
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.username.clone(), account);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_account(&self, username: &str) -> ApiResult<Option<Account>> {
        Ok(self.accounts.read().await.get(username).cloned())
    }

    async fn save_totp_secret(&self, username: &str, secret: &str) -> ApiResult<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(username).ok_or_else(|| {
            ApiError::Database(format!("no account for 2FA enrollment of {}", username))
        })?;
        account.totp_secret = Some(secret.to_string());
        Ok(())
    }
}
