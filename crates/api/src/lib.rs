// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Wira API Library
//!
//! Authentication and session management for the Wira backend: credential
//! checks, optional TOTP second factor, and opaque session tokens backed by an
//! in-memory, time-bounded session store.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
