//! Tests for the session gate and the routes behind it
//!
//! Tests cover:
//! - Login issuing a session cookie (password only and with 2FA)
//! - Session checks via cookie and Bearer header
//! - Expiry and logout revoking access
//! - Uniform rejections for bad credentials and malformed payloads
//! - 2FA enrollment (pending until confirmed), re-enrollment and lockout
//! - Per-user session limit
//! - Panic recovery leaving the store intact

#[cfg(test)]
mod tests {
    use super::super::accounts::{Account, InMemoryAccountStore};
    use super::super::clock::ManualClock;
    use super::super::{password, totp};
    use crate::{
        config::Config,
        routes::{apply_layers, create_router},
        state::AppState,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use time::Duration;
    use tower::ServiceExt;

    const PASSWORD: &str = "123!@#";

    struct TestApp {
        router: Router,
        state: AppState,
        clock: Arc<ManualClock>,
    }

    /// Setup a router over an in-memory account store with a controllable clock
    async fn setup_app(totp_secret: Option<String>) -> TestApp {
        let accounts = InMemoryAccountStore::new();
        accounts
            .insert(Account {
                username: "amanda".into(),
                email: Some("amanda04@example.net".into()),
                password_hash: password::hash_password(PASSWORD).unwrap(),
                totp_secret,
            })
            .await;

        let clock = Arc::new(ManualClock::starting_now());
        let state =
            AppState::with_clock(Config::default(), Arc::new(accounts), clock.clone()).unwrap();

        TestApp {
            router: create_router(state.clone()),
            state,
            clock,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, cookie, body)
    }

    fn login_request(body: Value) -> Request<Body> {
        Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "test-agent")
            .header("X-Forwarded-For", "203.0.113.9")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_cookie(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, format!("session_id={}", token))
            .body(Body::empty())
            .unwrap()
    }

    /// Token value out of a `Set-Cookie` header
    fn cookie_token(set_cookie: &str) -> String {
        set_cookie
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix("session_id="))
            .unwrap()
            .to_string()
    }

    async fn login(app: &TestApp) -> String {
        let (status, cookie, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        cookie_token(&cookie.unwrap())
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_returns_session() {
        let app = setup_app(None).await;

        let (status, cookie, body) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let cookie = cookie.unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=1800"));
        assert_eq!(body["message"], "Login successful");
        assert_eq!(body["session"]["session_metadata"]["username"], "amanda");
        assert_eq!(body["session"]["session_metadata"]["role"], "user");
        assert_eq!(
            body["session"]["session_metadata"]["ip_address"],
            "203.0.113.9"
        );
        assert_eq!(
            body["session"]["session_metadata"]["user_agent"],
            "test-agent"
        );
        // The token travels only in the cookie
        assert!(!body.to_string().contains(&cookie_token(&cookie)));
        assert_eq!(app.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_check_session_with_cookie() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let (status, _, body) =
            send(&app.router, with_cookie("GET", "/api/check-session", &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session is still valid");
        assert_eq!(body["session"]["username"], "amanda");
    }

    #[tokio::test]
    async fn test_check_session_with_bearer_token() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let request = Request::get("/api/check-session")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_session_returns_full_record() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let (status, _, body) =
            send(&app.router, with_cookie("GET", "/api/get-session", &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_metadata"]["username"], "amanda");
        assert!(body["created_at"].is_string());
        assert!(body["expiry_datetime"].is_string());
    }

    #[tokio::test]
    async fn test_missing_and_unknown_tokens_rejected() {
        let app = setup_app(None).await;

        let request = Request::get("/api/check-session")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);

        let (status, _, _) = send(
            &app.router,
            with_cookie("GET", "/api/check-session", "not-a-real-token"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_expires_after_thirty_minutes() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        app.clock.advance(Duration::minutes(29));
        let (status, _, _) =
            send(&app.router, with_cookie("GET", "/api/check-session", &token)).await;
        assert_eq!(status, StatusCode::OK);

        app.clock.advance(Duration::minutes(2));
        let (status, _, body) =
            send(&app.router, with_cookie("GET", "/api/check-session", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or expired session");
        assert!(app.state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let (status, cookie, body) =
            send(&app.router, with_cookie("POST", "/api/logout", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out successfully");
        assert!(cookie.unwrap().contains("Max-Age=0"));

        let (status, _, _) =
            send(&app.router, with_cookie("GET", "/api/check-session", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Logging out again is harmless
        let (status, _, _) =
            send(&app.router, with_cookie("POST", "/api/logout", &token)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout_without_token() {
        let app = setup_app(None).await;
        let request = Request::post("/api/logout").body(Body::empty()).unwrap();

        let (status, _, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_indistinguishable() {
        let app = setup_app(None).await;

        let (unknown_status, unknown_cookie, unknown_body) = send(
            &app.router,
            login_request(json!({"username": "nobody", "password": PASSWORD})),
        )
        .await;
        let (wrong_status, wrong_cookie, wrong_body) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": "wrong"})),
        )
        .await;

        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_status, wrong_status);
        assert_eq!(unknown_body, wrong_body);
        assert!(unknown_cookie.is_none());
        assert!(wrong_cookie.is_none());
        assert!(app.state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_login_payload() {
        let app = setup_app(None).await;

        for body in ["", "{", "[]", r#"{"username":"amanda"}"#, r#"{"username":1,"password":2}"#] {
            let request = Request::post("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();
            let (status, cookie, response) = send(&app.router, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {:?}", body);
            assert_eq!(response["code"], 400);
            assert!(cookie.is_none());
        }
    }

    #[tokio::test]
    async fn test_login_with_second_factor() {
        let secret = totp::generate_secret();
        let app = setup_app(Some(secret.clone())).await;

        let (status, _, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let code = totp::generate_current_code(&secret).unwrap();
        let (status, cookie, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD, "code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(cookie.is_some());
    }

    fn validate_request(token: &str, code: &str) -> Request<Body> {
        Request::post("/api/validate-2fa")
            .header(header::COOKIE, format!("session_id={}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "code": code }).to_string()))
            .unwrap()
    }

    fn setup_request(token: &str, code: Option<&str>) -> Request<Body> {
        let body = match code {
            Some(code) => Body::from(json!({ "code": code }).to_string()),
            None => Body::empty(),
        };
        Request::post("/api/setup-2fa")
            .header(header::COOKIE, format!("session_id={}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn enrolled_secret(app: &TestApp) -> Option<String> {
        app.state
            .accounts
            .find_account("amanda")
            .await
            .unwrap()
            .and_then(|a| a.totp_secret().map(String::from))
    }

    #[tokio::test]
    async fn test_setup_is_pending_until_confirmed() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let (status, _, body) = send(&app.router, setup_request(&token, None)).await;
        assert_eq!(status, StatusCode::OK);
        let secret = body["secret"].as_str().unwrap().to_string();
        assert!(totp::is_valid_secret(&secret));
        assert!(body["provisioning_uri"]
            .as_str()
            .unwrap()
            .starts_with("otpauth://totp/"));
        assert!(body["qr_code"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));

        // Nothing is committed before a confirming code
        assert_eq!(enrolled_secret(&app).await, None);

        let code = totp::generate_current_code(&secret).unwrap();
        let (status, _, body) = send(&app.router, validate_request(&token, &code)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "2FA enabled successfully");
        assert_eq!(enrolled_secret(&app).await, Some(secret.clone()));

        let (status, _, body) = send(&app.router, validate_request(&token, &code)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "2FA validated successfully");

        let (status, _, _) = send(&app.router, validate_request(&token, "abcdef")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_reenrollment_keeps_current_secret() {
        let old_secret = totp::generate_secret();
        let app = setup_app(Some(old_secret.clone())).await;
        let old_code = totp::generate_current_code(&old_secret).unwrap();
        let (status, cookie, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD, "code": old_code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = cookie_token(&cookie.unwrap());

        // Without, or with a wrong, current code the secret cannot be replaced
        let (status, _, _) = send(&app.router, setup_request(&token, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, _) = send(&app.router, setup_request(&token, Some("00000x"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(enrolled_secret(&app).await, Some(old_secret.clone()));

        // With it, the new secret is only staged
        let (status, _, body) =
            send(&app.router, setup_request(&token, Some(&old_code))).await;
        assert_eq!(status, StatusCode::OK);
        let new_secret = body["secret"].as_str().unwrap().to_string();
        assert_eq!(enrolled_secret(&app).await, Some(old_secret.clone()));

        // The authenticator app's old code still logs in
        let (status, _, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD, "code": old_code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let new_code = totp::generate_current_code(&new_secret).unwrap();
        let (status, _, body) = send(&app.router, validate_request(&token, &new_code)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "2FA enabled successfully");
        assert_eq!(enrolled_secret(&app).await, Some(new_secret));
    }

    #[tokio::test]
    async fn test_validate_two_factor_locks_after_repeated_failures() {
        use crate::auth::attempts::{LOCKOUT_DURATION, MAX_2FA_ATTEMPTS};

        let secret = totp::generate_secret();
        let app = setup_app(Some(secret.clone())).await;
        let code = totp::generate_current_code(&secret).unwrap();
        let (_, cookie, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD, "code": code})),
        )
        .await;
        let token = cookie_token(&cookie.unwrap());

        for _ in 0..=MAX_2FA_ATTEMPTS {
            let (status, _, _) = send(&app.router, validate_request(&token, "00000x")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        // Locked: the correct code is refused, at validate-2fa and at login
        let code = totp::generate_current_code(&secret).unwrap();
        let (status, _, _) = send(&app.router, validate_request(&token, &code)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, _) = send(
            &app.router,
            login_request(json!({"username": "amanda", "password": PASSWORD, "code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        app.clock.advance(LOCKOUT_DURATION);
        let code = totp::generate_current_code(&secret).unwrap();
        let (status, _, _) = send(&app.router, validate_request(&token, &code)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_repeated_logins_do_not_lock_out_other_users() {
        let accounts = InMemoryAccountStore::new();
        for username in ["mallory", "alice"] {
            accounts
                .insert(Account {
                    username: username.into(),
                    email: None,
                    password_hash: password::hash_password(PASSWORD).unwrap(),
                    totp_secret: None,
                })
                .await;
        }
        let config = Config {
            max_sessions: 5,
            max_sessions_per_user: 3,
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(accounts)).unwrap();
        let router = create_router(state.clone());

        for _ in 0..20 {
            let (status, _, _) = send(
                &router,
                login_request(json!({"username": "mallory", "password": PASSWORD})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(state.sessions.count_for_user("mallory"), 3);

        let (status, cookie, _) = send(
            &router,
            login_request(json!({"username": "alice", "password": PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = cookie_token(&cookie.unwrap());
        let (status, _, body) =
            send(&router, with_cookie("GET", "/api/check-session", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["username"], "alice");
    }

    async fn exploding_handler() -> &'static str {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let app = setup_app(None).await;
        let token = login(&app).await;

        let router = create_router(app.state.clone())
            .route("/api/explode", axum::routing::get(exploding_handler));
        let router = apply_layers(router, &app.state.config);

        let request = Request::get("/api/explode").body(Body::empty()).unwrap();
        let (status, _, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");

        // The store and its lock are still usable afterwards
        let (status, _, _) =
            send(&router, with_cookie("GET", "/api/check-session", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(
            &router,
            login_request(json!({"username": "amanda", "password": PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.state.sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_two_factor_routes_require_session() {
        let app = setup_app(None).await;

        for uri in ["/api/setup-2fa", "/api/validate-2fa"] {
            let request = Request::post(uri).body(Body::empty()).unwrap();
            let (status, _, _) = send(&app.router, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = setup_app(None).await;
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
