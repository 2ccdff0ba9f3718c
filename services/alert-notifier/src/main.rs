//! Pharmy Alert Notifier
//!
//! Background service that periodically refreshes reorder suggestions and
//! mails low-stock and expiry digests to tenant administrators.

use anyhow::Result;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use pharmy_database::{create_postgres_pool, migrations::run_postgres_migrations};
use pharmy_utils::{init_logging, AppConfig};

mod digest;
mod service;
mod template_engine;

use service::{run_scheduler, NotifierService, NotifierStatus, SharedStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().unwrap_or_else(|err| {
        eprintln!("Failed to load configuration ({}), using defaults", err);
        AppConfig::default()
    });

    init_logging(&config.logging)?;
    info!(environment = %config.environment, "Starting Pharmy Alert Notifier");

    let status: SharedStatus = Arc::new(RwLock::new(NotifierStatus {
        enabled: config.notifier.enabled,
        interval_minutes: config.notifier.interval_minutes,
        ..Default::default()
    }));

    if config.notifier.enabled {
        let pool = create_postgres_pool(
            &config.database.postgres_url,
            config.database.max_connections,
            std::time::Duration::from_secs(config.database.connection_timeout_seconds),
        )
        .await?;
        run_postgres_migrations(&pool).await?;

        let interval_minutes = config.notifier.interval_minutes;
        let service = NotifierService::new(pool, Arc::new(config.clone()))?;
        tokio::spawn(run_scheduler(service, status.clone(), interval_minutes));
        info!(interval_minutes, "Notification scheduler started");
    } else {
        info!("Notifier disabled by configuration; serving health only");
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(status);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.notifier.health_port));
    let listener = TcpListener::bind(&addr).await?;
    info!("Alert Notifier health endpoint listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(status): State<SharedStatus>) -> Json<serde_json::Value> {
    let status = status.read().await.clone();
    Json(json!({
        "status": if status.last_error.is_some() { "degraded" } else { "healthy" },
        "service": "alert-notifier",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler": status,
    }))
}
