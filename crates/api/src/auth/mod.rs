//! Authentication module for Wira
//!
//! Password and optional TOTP login, an in-memory session store with fixed
//! expiry, a background sweeper, and the session gate used by protected routes.

pub mod accounts;
pub mod attempts;
pub mod clock;
pub mod enrollment;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod password;
pub mod pipeline;
pub mod sessions;
pub mod sweeper;
pub mod totp;

pub use accounts::{Account, AccountStore, InMemoryAccountStore, PgAccountStore};
pub use attempts::{SecondFactorLimiter, MAX_2FA_ATTEMPTS};
pub use enrollment::PendingEnrollments;
pub use middleware::{authorize, require_session, AuthSession, AuthState, SESSION_COOKIE};
pub use password::{
    generate_impossible_hash, hash_password, verify_password, CredentialVerifier,
};
pub use pipeline::{Authenticator, ClientInfo, IssuedSession, LoginAttempt, LoginFailure};
pub use sessions::{
    Session, SessionError, SessionMetadata, SessionStore, MAX_SESSIONS_PER_USER,
    SESSION_TTL,
};
pub use sweeper::{ExpirySweeper, SWEEP_INTERVAL};
pub use totp::{TotpEnrollment, TotpError};
