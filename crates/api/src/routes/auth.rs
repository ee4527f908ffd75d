//! Login, logout, session inspection and 2FA enrollment routes

use axum::{
    body::Bytes,
    extract::{Extension, Request, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use time::{macros::format_description, OffsetDateTime, UtcOffset};

use crate::{
    auth::{
        enrollment::ENROLLMENT_TTL,
        middleware::{client_info, extract_session_token},
        sessions::token_prefix,
        totp, AuthSession, LoginAttempt, Session, SESSION_COOKIE,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Upper bound on JSON request bodies
const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct TwoFactorCode {
    pub code: String,
}

/// Body of `setup-2fa`; the current code is required only to replace an enrolled secret
#[derive(Debug, Default, Deserialize)]
pub struct TwoFactorSetup {
    #[serde(default)]
    pub code: Option<String>,
}

async fn read_body(request: Request) -> ApiResult<Bytes> {
    axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::MalformedRequest(e.to_string()))
}

async fn read_json<T: DeserializeOwned>(request: Request) -> ApiResult<T> {
    let bytes = read_body(request).await?;
    parse_json(&bytes)
}

/// Like [`read_json`], but an empty body yields `T::default()`
async fn read_optional_json<T: DeserializeOwned + Default>(request: Request) -> ApiResult<T> {
    let bytes = read_body(request).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(&bytes)
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::debug!(error = %e, "Rejecting malformed JSON payload");
        ApiError::MalformedRequest(e.to_string())
    })
}

fn http_date(at: OffsetDateTime) -> ApiResult<String> {
    at.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .map_err(|e| ApiError::Internal(format!("failed to format cookie expiry: {}", e)))
}

/// `Set-Cookie` value handing the session token to the client
fn session_cookie(session: &Session, secure: bool) -> ApiResult<HeaderValue> {
    let max_age = (session.expires_at - session.created_at).whole_seconds();
    let mut cookie = format!(
        "{}={}; Path=/; Expires={}; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        session.token.as_str(),
        http_date(session.expires_at)?,
        max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.to_string()))
}

/// `Set-Cookie` value that removes the session cookie
fn cleared_cookie(secure: bool) -> ApiResult<HeaderValue> {
    let mut cookie = format!(
        "{}=; Path=/; Expires={}; Max-Age=0; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        http_date(OffsetDateTime::UNIX_EPOCH)?
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.to_string()))
}

/// POST /api/login
pub async fn login(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let client = client_info(&request);
    let attempt: LoginAttempt = read_json(request).await?;

    let issued = state.authenticator.authenticate(attempt, client).await?;
    let cookie = session_cookie(&issued.session, state.config.cookie_secure)?;

    let body = Json(json!({
        "message": "Login successful",
        "session": &*issued.session,
    }));
    Ok(([(SET_COOKIE, cookie)], body).into_response())
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let token = extract_session_token(&headers).ok_or(ApiError::Unauthorized)?;

    if state.sessions.revoke(&token) {
        tracing::info!(token_prefix = %token_prefix(&token), "Logged out");
    }

    let body = Json(json!({ "message": "Logged out successfully" }));
    Ok((
        [(SET_COOKIE, cleared_cookie(state.config.cookie_secure)?)],
        body,
    )
        .into_response())
}

/// GET /api/check-session
pub async fn check_session(Extension(AuthSession(session)): Extension<AuthSession>) -> Json<Value> {
    Json(json!({
        "message": "Session is still valid",
        "session": session.metadata,
    }))
}

/// GET /api/get-session
pub async fn get_session(Extension(AuthSession(session)): Extension<AuthSession>) -> Json<Session> {
    Json(Session::clone(&session))
}

/// POST /api/setup-2fa
///
/// Generates a new secret and holds it pending until `validate-2fa` sees a code
/// for it. Replacing an enrolled secret also needs a valid code for the current
/// one. This is the only response that ever carries a secret.
pub async fn setup_two_factor(
    State(state): State<AppState>,
    Extension(AuthSession(session)): Extension<AuthSession>,
    request: Request,
) -> ApiResult<Json<Value>> {
    let TwoFactorSetup { code } = read_optional_json(request).await?;
    let username = &session.metadata.username;
    let account = state
        .accounts
        .find_account(username)
        .await?
        .ok_or_else(|| {
            tracing::warn!(username = %username, "2FA setup for a session whose account no longer exists");
            ApiError::Unauthorized
        })?;

    if let Some(current) = account.totp_secret() {
        let limiter = &state.second_factor_limiter;
        if limiter.is_locked(username) {
            tracing::warn!(username = %username, "2FA re-enrollment refused: second factor locked");
            return Err(ApiError::InvalidCredentials);
        }
        match code.as_deref() {
            Some(code) if totp::validate(current, code) => limiter.reset(username),
            Some(_) => {
                limiter.record_failure(username);
                tracing::warn!(username = %username, "2FA re-enrollment refused: wrong current code");
                return Err(ApiError::InvalidCredentials);
            }
            None => {
                tracing::warn!(username = %username, "2FA re-enrollment refused: current code missing");
                return Err(ApiError::InvalidCredentials);
            }
        }
    }

    let enrollment = totp::enroll(&state.config.totp_issuer, account.totp_label())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .enrollments
        .stage(username, enrollment.secret.clone());

    tracing::info!(username = %username, "2FA enrollment pending confirmation");

    Ok(Json(json!({
        "message": "Scan the QR code, then confirm with a code to enable 2FA",
        "secret": enrollment.secret,
        "provisioning_uri": enrollment.provisioning_uri,
        "qr_code": enrollment.qr_code,
        "expires_in": ENROLLMENT_TTL.whole_seconds(),
    })))
}

/// POST /api/validate-2fa
///
/// Confirms a pending enrollment when the code matches it, otherwise checks the
/// code against the enrolled secret.
pub async fn validate_two_factor(
    State(state): State<AppState>,
    Extension(AuthSession(session)): Extension<AuthSession>,
    request: Request,
) -> ApiResult<Json<Value>> {
    let TwoFactorCode { code } = read_json(request).await?;
    let username = &session.metadata.username;
    let limiter = &state.second_factor_limiter;

    if limiter.is_locked(username) {
        tracing::warn!(username = %username, "2FA validation refused: second factor locked");
        return Err(ApiError::InvalidCredentials);
    }

    if let Some(secret) = state.enrollments.confirm(username, &code) {
        state.accounts.save_totp_secret(username, &secret).await?;
        limiter.reset(username);
        tracing::info!(username = %username, "2FA enrolled");
        return Ok(Json(json!({ "message": "2FA enabled successfully" })));
    }

    let account = state.accounts.find_account(username).await?;
    let valid = account
        .as_ref()
        .and_then(|a| a.totp_secret())
        .is_some_and(|secret| totp::validate(secret, &code));

    if !valid {
        let locked = limiter.record_failure(username);
        tracing::warn!(
            username = %username,
            enrolled = account.as_ref().is_some_and(|a| a.totp_secret().is_some()),
            pending = state.enrollments.is_pending(username),
            locked,
            "2FA validation failed"
        );
        return Err(ApiError::InvalidCredentials);
    }

    limiter.reset(username);
    Ok(Json(json!({ "message": "2FA validated successfully" })))
}
