//! In-memory session store
//!
//! Maps opaque session tokens to immutable session records with an absolute expiry.
//! Sessions live only in this process and are lost on restart.
//!
//! A record is valid while `now < expires_at`. The same predicate is used by lazy
//! eviction in [`SessionStore::lookup`] and by the periodic sweep in
//! [`SessionStore::purge_expired`], and both read the store's own clock.

use parking_lot::RwLock;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};

/// Fixed lifetime of a session, counted from creation. There is no sliding renewal.
pub const SESSION_TTL: Duration = Duration::minutes(30);

/// Upper bound on live records across all users. Creating past it fails with
/// `StoreExhausted`.
pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

/// Live sessions one user may hold; a further login revokes that user's oldest
pub const MAX_SESSIONS_PER_USER: usize = 10;

/// Role assigned to every interactive login
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
    #[error("Session expired")]
    Expired,
    #[error("Session store exhausted")]
    StoreExhausted,
}

/// Opaque bearer token identifying one session.
///
/// Backed by a v4 UUID drawn from the OS CSPRNG, so uniqueness is a property of
/// construction and is not checked on insert.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the token, safe to put in logs
    pub fn prefix(&self) -> &str {
        token_prefix(&self.0)
    }
}

impl Borrow<str> for SessionToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.prefix())
    }
}

/// Log-safe prefix of a raw token string
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}

/// Identity attached to a session at creation. Never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub username: String,
    /// Passed through unexamined; no authorization decisions are made on it
    pub role: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionMetadata {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: DEFAULT_ROLE.to_string(),
            ip_address: None,
            user_agent: None,
        }
    }
}

/// Immutable snapshot of a session record
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(skip)]
    pub token: SessionToken,
    #[serde(rename = "session_metadata")]
    pub metadata: SessionMetadata,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(rename = "expiry_datetime", with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Records plus a per-user index, always mutated together under one lock
#[derive(Default)]
struct Entries {
    by_token: HashMap<SessionToken, Arc<Session>>,
    /// Each user's tokens, oldest first
    by_user: HashMap<String, VecDeque<SessionToken>>,
}

impl Entries {
    fn insert(&mut self, session: Arc<Session>) {
        self.by_user
            .entry(session.metadata.username.clone())
            .or_default()
            .push_back(session.token.clone());
        self.by_token.insert(session.token.clone(), session);
    }

    fn remove(&mut self, token: &str) -> Option<Arc<Session>> {
        let session = self.by_token.remove(token)?;
        let username = &session.metadata.username;
        if let Some(tokens) = self.by_user.get_mut(username) {
            tokens.retain(|t| t.as_str() != token);
            if tokens.is_empty() {
                self.by_user.remove(username);
            }
        }
        Some(session)
    }

    fn purge_expired(&mut self, now: OffsetDateTime) -> Vec<SessionToken> {
        let Entries { by_token, by_user } = self;
        let mut evicted = Vec::new();
        by_token.retain(|token, session| {
            if session.is_expired_at(now) {
                evicted.push(token.clone());
                false
            } else {
                true
            }
        });
        if !evicted.is_empty() {
            by_user.retain(|_, tokens| {
                tokens.retain(|t| by_token.contains_key(t));
                !tokens.is_empty()
            });
        }
        evicted
    }

    /// Make room for one more session of `username`, revoking its oldest live ones
    fn enforce_user_limit(&mut self, username: &str, now: OffsetDateTime, limit: usize) {
        let Some(tokens) = self.by_user.get(username) else {
            return;
        };
        let (expired, mut live): (VecDeque<_>, VecDeque<_>) = tokens
            .iter()
            .cloned()
            .partition(|t| self.by_token.get(t).map_or(true, |s| s.is_expired_at(now)));

        for token in expired {
            self.remove(token.as_str());
        }
        while live.len() >= limit.max(1) {
            let Some(oldest) = live.pop_front() else {
                break;
            };
            self.remove(oldest.as_str());
            tracing::info!(
                username = %username,
                token_prefix = %oldest.prefix(),
                max_sessions_per_user = limit,
                "Revoking oldest session due to per-user session limit"
            );
        }
    }
}

/// Thread-safe session store.
///
/// Lookups share a read lock. Create, revoke and bulk eviction take the write
/// lock, so no reader ever sees a partially modified map.
pub struct SessionStore {
    entries: RwLock<Entries>,
    clock: Arc<dyn Clock>,
    max_sessions: usize,
    max_sessions_per_user: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            clock,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_sessions_per_user: MAX_SESSIONS_PER_USER,
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_max_sessions_per_user(mut self, max_sessions_per_user: usize) -> Self {
        self.max_sessions_per_user = max_sessions_per_user;
        self
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Mint a new session valid for [`SESSION_TTL`]
    ///
    /// A user already holding the per-user maximum loses their oldest session,
    /// so repeated logins by one account cannot crowd out anyone else. Only when
    /// the whole store is still full after reclaiming expired records does the
    /// call fail.
    pub fn create(&self, metadata: SessionMetadata) -> Result<Arc<Session>, SessionError> {
        let now = self.clock.now();
        let session = Arc::new(Session {
            token: SessionToken::generate(),
            metadata,
            created_at: now,
            expires_at: now + SESSION_TTL,
        });

        let mut entries = self.entries.write();
        entries.enforce_user_limit(&session.metadata.username, now, self.max_sessions_per_user);
        if entries.by_token.len() >= self.max_sessions {
            entries.purge_expired(now);
            if entries.by_token.len() >= self.max_sessions {
                tracing::warn!(
                    live_sessions = entries.by_token.len(),
                    max_sessions = self.max_sessions,
                    "Session store at capacity, rejecting new session"
                );
                return Err(SessionError::StoreExhausted);
            }
        }
        entries.insert(Arc::clone(&session));
        drop(entries);

        tracing::debug!(
            token_prefix = %session.token.prefix(),
            username = %session.metadata.username,
            "Session created"
        );

        Ok(session)
    }

    /// Return the session if present and unexpired
    ///
    /// An expired hit is removed as a side effect and reported as `Expired`.
    pub fn lookup(&self, token: &str) -> Result<Arc<Session>, SessionError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.by_token.get(token) {
                None => return Err(SessionError::NotFound),
                Some(session) if !session.is_expired_at(now) => return Ok(Arc::clone(session)),
                Some(_) => {}
            }
        }

        // The read guard is released above; re-check under the write lock because
        // the record may have been swept or revoked in between.
        let mut entries = self.entries.write();
        if entries
            .by_token
            .get(token)
            .is_some_and(|session| session.is_expired_at(now))
        {
            entries.remove(token);
            tracing::debug!(token_prefix = %token_prefix(token), "Expired session evicted on lookup");
        }

        Err(SessionError::Expired)
    }

    /// Remove the session if present. Idempotent.
    ///
    /// Returns true when a record was actually removed.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.entries.write().remove(token).is_some();
        if removed {
            tracing::debug!(token_prefix = %token_prefix(token), "Session revoked");
        }
        removed
    }

    /// Evict every record whose expiry is at or before now, returning the evicted tokens
    pub fn purge_expired(&self) -> Vec<SessionToken> {
        let mut entries = self.entries.write();
        let now = self.clock.now();
        entries.purge_expired(now)
    }

    /// Number of records held for `username`, expired or not
    pub fn count_for_user(&self, username: &str) -> usize {
        self.entries
            .read()
            .by_user
            .get(username)
            .map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().by_token.is_empty()
    }
}
