//! Second-factor attempt limiting
//!
//! Counts failed 2FA codes per user. After [`MAX_2FA_ATTEMPTS`] failures inside
//! [`ATTEMPT_WINDOW`], the next failure locks the user's second factor for
//! [`LOCKOUT_DURATION`]; while locked even a correct code is refused. A
//! successful code clears the record.
//!
//! Only attempts that already passed the password check (login) or hold a
//! session (`validate-2fa`) reach the counter, so a stranger cannot lock an
//! account out.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use super::clock::{Clock, SystemClock};

/// Failures tolerated before the lockout; the next one locks
pub const MAX_2FA_ATTEMPTS: u32 = 5;

pub const LOCKOUT_DURATION: Duration = Duration::minutes(15);

/// Failures older than this no longer count
pub const ATTEMPT_WINDOW: Duration = Duration::minutes(15);

/// Records kept before stale ones are dropped
pub const MAX_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    first_failure: OffsetDateTime,
    locked_until: Option<OffsetDateTime>,
}

impl FailureRecord {
    fn is_locked_at(&self, now: OffsetDateTime) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        !self.is_locked_at(now) && now - self.first_failure >= ATTEMPT_WINDOW
    }
}

pub struct SecondFactorLimiter {
    records: Mutex<HashMap<String, FailureRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for SecondFactorLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SecondFactorLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn is_locked(&self, username: &str) -> bool {
        let now = self.clock.now();
        self.records
            .lock()
            .get(username)
            .is_some_and(|record| record.is_locked_at(now))
    }

    /// Count one failed code. Returns true when the user is now locked.
    pub fn record_failure(&self, username: &str) -> bool {
        let now = self.clock.now();
        let mut records = self.records.lock();

        if records.len() >= MAX_RECORDS && !records.contains_key(username) {
            records.retain(|_, record| !record.is_stale_at(now));
        }

        let record = records
            .entry(username.to_string())
            .or_insert(FailureRecord {
                count: 0,
                first_failure: now,
                locked_until: None,
            });

        if record.is_stale_at(now) {
            *record = FailureRecord {
                count: 0,
                first_failure: now,
                locked_until: None,
            };
        }

        record.count += 1;
        if record.count > MAX_2FA_ATTEMPTS && !record.is_locked_at(now) {
            record.locked_until = Some(now + LOCKOUT_DURATION);
            tracing::warn!(
                username = %username,
                failures = record.count,
                lockout_minutes = LOCKOUT_DURATION.whole_minutes(),
                "Second factor locked after repeated failures"
            );
        }

        record.is_locked_at(now)
    }

    pub fn reset(&self, username: &str) {
        self.records.lock().remove(username);
    }
}
