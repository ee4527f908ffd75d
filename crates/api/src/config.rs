//! Configuration loaded from the environment (and `.env` via dotenvy)

use std::env;
use std::str::FromStr;

use crate::auth::sessions::{DEFAULT_MAX_SESSIONS, MAX_SESSIONS_PER_USER};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Postgres URL for the accounts table; without it accounts are kept in memory
    pub database_url: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Mark the session cookie `Secure`. Enable in production behind TLS.
    pub cookie_secure: bool,
    pub totp_issuer: String,
    /// Require the 2FA code at login for accounts that have a secret enrolled
    pub enforce_totp: bool,
    pub max_sessions: usize,
    /// Live sessions per user; logging in beyond it revokes that user's oldest
    pub max_sessions_per_user: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8181".to_string(),
            database_url: None,
            allowed_origins: vec!["http://localhost:8080".to_string()],
            cookie_secure: false,
            totp_issuer: "WiraApp".to_string(),
            enforce_totp: true,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_sessions_per_user: MAX_SESSIONS_PER_USER,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let allowed_origins = match env::var("ALLOWED_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.allowed_origins,
        };

        let log_format = match optional("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            bind_address: optional("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: optional("DATABASE_URL"),
            allowed_origins,
            cookie_secure: parse_bool("COOKIE_SECURE", defaults.cookie_secure)?,
            totp_issuer: optional("TOTP_ISSUER").unwrap_or(defaults.totp_issuer),
            enforce_totp: parse_bool("ENFORCE_TOTP", defaults.enforce_totp)?,
            max_sessions: parse("MAX_SESSIONS", defaults.max_sessions)?,
            max_sessions_per_user: parse("MAX_SESSIONS_PER_USER", defaults.max_sessions_per_user)?,
            log_format,
        })
    }
}

/// Set and non-empty
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}
