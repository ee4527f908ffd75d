//! Session gate for protected endpoints
//!
//! The only way a handler obtains an identity: the token is taken from the
//! `session_id` cookie (or an `Authorization: Bearer` header for non-browser
//! clients), checked against the session store, and the session snapshot is
//! placed in request extensions. The gate never modifies a session.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, USER_AGENT},
        HeaderMap,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::pipeline::ClientInfo;
use super::sessions::{token_prefix, Session, SessionError, SessionStore};
use crate::error::{ApiError, ApiResult};

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_id";

/// Authenticated session inserted by [`require_session`]
#[derive(Debug, Clone)]
pub struct AuthSession(pub Arc<Session>);

/// State needed by the gate
#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<SessionStore>,
}

/// Extract the session token from the `Cookie` header
pub fn extract_token_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.trim().to_string())
        })
        .find(|value| !value.is_empty())
}

/// Session token from the cookie, falling back to a bearer header
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_token_from_cookie(headers) {
        return Some(token);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Extract the client IP (X-Forwarded-For, CF-Connecting-IP, X-Real-IP, then the socket)
pub fn extract_ip_address(request: &Request) -> Option<String> {
    let headers = request.headers();
    // X-Forwarded-For may contain a chain, the first entry is the client
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|h| h.to_str().ok()) {
        if let Some(first) = xff.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return Some(first.to_string());
        }
    }
    if let Some(ip) = headers.get("CF-Connecting-IP").and_then(|h| h.to_str().ok()) {
        return Some(ip.to_string());
    }
    if let Some(ip) = headers.get("X-Real-IP").and_then(|h| h.to_str().ok()) {
        return Some(ip.to_string());
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
}

pub fn client_info(request: &Request) -> ClientInfo {
    ClientInfo {
        ip_address: extract_ip_address(request),
        user_agent: request
            .headers()
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(String::from),
    }
}

/// Resolve a presented token to its session
///
/// Missing, unknown and expired tokens all become `Unauthorized`.
pub fn authorize(sessions: &SessionStore, token: Option<&str>) -> ApiResult<Arc<Session>> {
    let Some(token) = token else {
        tracing::debug!("authorize: no session token presented");
        return Err(ApiError::Unauthorized);
    };

    sessions.lookup(token).map_err(|err| {
        match err {
            SessionError::Expired => {
                tracing::info!(token_prefix = %token_prefix(token), "authorize: session expired")
            }
            _ => {
                tracing::warn!(token_prefix = %token_prefix(token), error = %err, "authorize: session rejected")
            }
        }
        ApiError::from(err)
    })
}

/// Middleware that requires a valid session
pub async fn require_session(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = extract_session_token(request.headers());

    match authorize(&auth_state.sessions, token.as_deref()) {
        Ok(session) => {
            tracing::debug!(
                path = %request.uri().path(),
                username = %session.metadata.username,
                "require_session: authorized"
            );
            request.extensions_mut().insert(AuthSession(session));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
