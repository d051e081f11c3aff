//! Survey chat service
//!
//! A conversational survey bot. Customers answer a scripted questionnaire
//! over plain HTTP or a WebSocket; answers are persisted in SQLite.

mod api;
mod config;
mod db;
mod retry;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use runtime::{DatabaseStore, FlakyStore, SurveyRuntime, SurveyStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    let db = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening database");
            Database::open(path)?
        }
        None => {
            tracing::info!("Opening in-memory database");
            Database::open_in_memory()?
        }
    };

    let store: Arc<dyn SurveyStore> = if config.simulates_network() {
        tracing::warn!(
            failure_rate = config.failure_rate,
            latency_min_ms = u64::try_from(config.latency_min.as_millis()).unwrap_or(u64::MAX),
            latency_max_ms = u64::try_from(config.latency_max.as_millis()).unwrap_or(u64::MAX),
            "Simulating an unreliable store"
        );
        Arc::new(FlakyStore::new(
            DatabaseStore::new(db),
            config.failure_rate,
            config.latency_min,
            config.latency_max,
        ))
    } else {
        Arc::new(DatabaseStore::new(db))
    };

    let runtime = SurveyRuntime::new(store, config.retry);
    let state = AppState::new(runtime, config.close_grace);
    let deferred = state.deferred.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Survey chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Waiting for deferred work to finish");
    deferred.drain().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
