//! Pending 2FA enrollments
//!
//! A freshly generated secret is held here, not in the account store, until the
//! user proves they imported it by submitting a valid code. Until then the
//! previously enrolled secret (if any) stays in force.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use super::clock::{Clock, SystemClock};
use super::totp;

/// How long a staged secret waits for its confirming code
pub const ENROLLMENT_TTL: Duration = Duration::minutes(10);

struct Pending {
    secret: String,
    expires_at: OffsetDateTime,
}

pub struct PendingEnrollments {
    pending: Mutex<HashMap<String, Pending>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PendingEnrollments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEnrollments")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl Default for PendingEnrollments {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl PendingEnrollments {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Hold `secret` for `username`, replacing any earlier unconfirmed one
    pub fn stage(&self, username: &str, secret: String) {
        let now = self.clock.now();
        let mut pending = self.pending.lock();
        pending.retain(|_, p| p.expires_at > now);
        pending.insert(
            username.to_string(),
            Pending {
                secret,
                expires_at: now + ENROLLMENT_TTL,
            },
        );
    }

    pub fn is_pending(&self, username: &str) -> bool {
        let now = self.clock.now();
        self.pending
            .lock()
            .get(username)
            .is_some_and(|p| p.expires_at > now)
    }

    /// Take the staged secret if `code` is valid for it
    ///
    /// On a wrong code the secret stays staged. An expired entry is dropped.
    pub fn confirm(&self, username: &str, code: &str) -> Option<String> {
        let now = self.clock.now();
        let mut pending = self.pending.lock();
        let entry = pending.get(username)?;

        if entry.expires_at <= now {
            pending.remove(username);
            return None;
        }
        if !totp::validate(&entry.secret, code) {
            return None;
        }
        pending.remove(username).map(|p| p.secret)
    }
}
