//! Pomodoro sync server: HTTP API and change-feed WebSocket over the focus engine

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use pomodoro_sync::api::{create_router, AppState};
use pomodoro_sync::config::Config;
use pomodoro_sync::database::{ChangeFeedHub, DatabaseManager, SqliteStore};
use pomodoro_sync::logging::{init_logging, log_startup};
use pomodoro_sync::services::{EngineOptions, FocusEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    init_logging(&config);
    log_startup();
    config.log_config();

    let db = DatabaseManager::new(&config.database_url)
        .await
        .context("Failed to open database")?;
    db.migrate().await.context("Failed to run migrations")?;

    let feed = ChangeFeedHub::new(config.channel_capacity);
    let store = Arc::new(SqliteStore::new(&db, feed.clone()));
    let engine = Arc::new(FocusEngine::new(
        store,
        Arc::new(feed),
        EngineOptions::from_config(&config),
    ));
    let _sweeper = engine.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));

    let cors = build_cors(&config)?;
    let app = create_router(AppState::new(engine)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Pomodoro sync server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn build_cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.cors_origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }

    let origins = config
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(cors.allow_origin(origins))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
