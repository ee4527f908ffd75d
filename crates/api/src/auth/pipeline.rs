//! Login pipeline
//!
//! `start → account lookup → password check → (2FA enrolled?) code check → session minted`
//!
//! Every rejection reaches the caller as the same "invalid credentials" outcome.
//! Which step failed is only recorded in server logs.

use std::fmt;
use std::sync::Arc;

use super::accounts::AccountStore;
use super::attempts::SecondFactorLimiter;
use super::password::{CredentialVerifier, PasswordError};
use super::sessions::{Session, SessionMetadata, SessionStore, DEFAULT_ROLE};
use super::totp;
use crate::error::{ApiError, ApiResult};

/// Server-side reason a login was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoginFailure {
    #[error("unknown_user")]
    UnknownUser,
    #[error("wrong_password")]
    WrongPassword,
    #[error("second_factor_missing")]
    SecondFactorMissing,
    #[error("wrong_second_factor")]
    WrongSecondFactor,
    #[error("second_factor_locked")]
    SecondFactorLocked,
}

/// Credentials submitted for one login
#[derive(Clone, serde::Deserialize)]
pub struct LoginAttempt {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("username", &self.username)
            .field("has_code", &self.code.is_some())
            .finish()
    }
}

/// Where the login came from, recorded on the session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Arc<Session>,
}

#[derive(Clone)]
pub struct Authenticator {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<SessionStore>,
    enforce_totp: bool,
    /// Equalizes timing across unknown users and both digest schemes
    verifier: Arc<CredentialVerifier>,
    second_factor_limiter: Arc<SecondFactorLimiter>,
}

impl Authenticator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<SessionStore>,
        enforce_totp: bool,
    ) -> Result<Self, PasswordError> {
        if !enforce_totp {
            tracing::warn!("2FA enforcement disabled: enrolled accounts can log in without a code");
        }
        Ok(Self {
            accounts,
            sessions,
            enforce_totp,
            verifier: Arc::new(CredentialVerifier::new()?),
            second_factor_limiter: Arc::new(SecondFactorLimiter::default()),
        })
    }

    /// Share a limiter with the other routes that check codes
    pub fn with_second_factor_limiter(mut self, limiter: Arc<SecondFactorLimiter>) -> Self {
        self.second_factor_limiter = limiter;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run a login attempt and mint a session on success
    pub async fn authenticate(
        &self,
        attempt: LoginAttempt,
        client: ClientInfo,
    ) -> ApiResult<IssuedSession> {
        if let Err(failure) = self.check_credentials(&attempt).await? {
            tracing::warn!(
                username = %attempt.username,
                reason = %failure,
                ip_address = ?client.ip_address,
                "Login rejected"
            );
            return Err(ApiError::from(failure));
        }

        let session = self.sessions.create(SessionMetadata {
            username: attempt.username,
            role: DEFAULT_ROLE.to_string(),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        })?;

        tracing::info!(
            username = %session.metadata.username,
            expires_at = %session.expires_at,
            "Login successful"
        );

        Ok(IssuedSession { session })
    }

    /// Outer error is an infrastructure failure; inner is the rejection reason
    async fn check_credentials(
        &self,
        attempt: &LoginAttempt,
    ) -> ApiResult<Result<(), LoginFailure>> {
        let Some(account) = self.accounts.find_account(&attempt.username).await? else {
            self.verifier.verify(&attempt.password, None);
            return Ok(Err(LoginFailure::UnknownUser));
        };

        if !self
            .verifier
            .verify(&attempt.password, Some(account.password_hash.as_str()))
        {
            return Ok(Err(LoginFailure::WrongPassword));
        }

        let Some(secret) = account.totp_secret() else {
            return Ok(Ok(()));
        };
        if !self.enforce_totp {
            return Ok(Ok(()));
        }

        let limiter = &self.second_factor_limiter;
        if limiter.is_locked(&account.username) {
            return Ok(Err(LoginFailure::SecondFactorLocked));
        }

        match attempt.code.as_deref() {
            None | Some("") => Ok(Err(LoginFailure::SecondFactorMissing)),
            Some(code) if totp::validate(secret, code) => {
                limiter.reset(&account.username);
                Ok(Ok(()))
            }
            Some(_) => {
                limiter.record_failure(&account.username);
                Ok(Err(LoginFailure::WrongSecondFactor))
            }
        }
    }
}
