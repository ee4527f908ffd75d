//! Application state

use std::sync::Arc;

use crate::{
    auth::{
        clock::{Clock, SystemClock},
        password::PasswordError,
        AccountStore, AuthState, Authenticator, PendingEnrollments, SecondFactorLimiter,
        SessionStore,
    },
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// The one session store of this process
    pub sessions: Arc<SessionStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub authenticator: Authenticator,
    /// Secrets from `setup-2fa` awaiting their confirming code
    pub enrollments: Arc<PendingEnrollments>,
    /// Shared by login and `validate-2fa`
    pub second_factor_limiter: Arc<SecondFactorLimiter>,
}

impl AppState {
    pub fn new(config: Config, accounts: Arc<dyn AccountStore>) -> Result<Self, PasswordError> {
        Self::with_clock(config, accounts, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PasswordError> {
        let sessions = Arc::new(
            SessionStore::with_clock(clock.clone())
                .with_max_sessions(config.max_sessions)
                .with_max_sessions_per_user(config.max_sessions_per_user),
        );
        tracing::info!(
            max_sessions = config.max_sessions,
            max_sessions_per_user = config.max_sessions_per_user,
            "Session store initialized"
        );

        let second_factor_limiter = Arc::new(SecondFactorLimiter::new(clock.clone()));
        let authenticator =
            Authenticator::new(accounts.clone(), sessions.clone(), config.enforce_totp)?
                .with_second_factor_limiter(second_factor_limiter.clone());

        Ok(Self {
            config,
            sessions,
            accounts,
            authenticator,
            enrollments: Arc::new(PendingEnrollments::new(clock)),
            second_factor_limiter,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            sessions: self.sessions.clone(),
        }
    }
}
