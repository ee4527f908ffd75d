//! Wira API Server
//!
//! Serves login, logout, session checks and 2FA enrollment, and runs the
//! session expiry sweeper for the lifetime of the process.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wira_api::{
    auth::{AccountStore, ExpirySweeper, InMemoryAccountStore, PgAccountStore, SWEEP_INTERVAL},
    config::{Config, LogFormat},
    db::create_pool,
    routes::build_app,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wira_api=debug".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    tracing::info!("Starting Wira API Server v{}", env!("CARGO_PKG_VERSION"));

    let accounts: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(url).await?;
            tracing::info!("Database connection established");
            Arc::new(PgAccountStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using an empty in-memory account store");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    let state = AppState::new(config.clone(), accounts)?;

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::spawn(state.sessions.clone(), SWEEP_INTERVAL, shutdown.clone());

    let app = build_app(state);

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    sweeper.await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
