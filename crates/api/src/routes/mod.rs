//! HTTP routes

pub mod auth;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::require_session, config::Config, error::panic_response,
    security::security_headers_middleware, state::AppState,
};

/// Build the application router
///
/// Session-protected routes sit behind the session gate; login, logout and the
/// health check do not.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/check-session", get(auth::check_session))
        .route("/api/get-session", get(auth::get_session))
        .route("/api/setup-2fa", post(auth::setup_two_factor))
        .route("/api/validate-2fa", post(auth::validate_two_factor))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .merge(protected)
        .with_state(state)
}

/// Router with the full middleware stack the server runs
pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    apply_layers(create_router(state), &config)
}

/// Security headers, panic recovery, CORS and request tracing
///
/// A panicking handler becomes a 500 for that request only; the session store
/// and every other in-flight request are unaffected.
pub fn apply_layers(router: Router, config: &Config) -> Router {
    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    router
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
