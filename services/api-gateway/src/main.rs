use anyhow::Result;
use axum::serve;
use pharmy_api_gateway::{create_app, AppState};
use pharmy_database::{initialize_databases, RedisSessionStore};
use pharmy_utils::{init_logging, rx::OcrClient, AppConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().unwrap_or_else(|err| {
        eprintln!("Failed to load configuration ({}), using defaults", err);
        AppConfig::default()
    });

    // Initialize logging
    init_logging(&config.logging)?;
    info!(environment = %config.environment, "Starting Pharmy API Gateway");

    if config.is_production() && config.auth.token_secret == AppConfig::default().auth.token_secret {
        warn!("Running in production with the development token secret");
    }

    // Initialize databases
    let db_config = pharmy_database::DatabaseConfig {
        postgres_url: config.database.postgres_url.clone(),
        redis_url: config.database.redis_url.clone(),
        max_connections: config.database.max_connections,
        connection_timeout: std::time::Duration::from_secs(config.database.connection_timeout_seconds),
    };
    let (postgres_pool, redis_pool) = initialize_databases(&db_config).await?;
    info!("Database connections established");

    tokio::fs::create_dir_all(&config.uploads.storage_dir).await?;
    let ocr = OcrClient::from_config(&config.uploads)?;
    if !ocr.is_enabled() {
        info!("OCR is not configured; uploaded prescriptions will not be transcribed");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(
        postgres_pool,
        Arc::new(RedisSessionStore::new(redis_pool)),
        ocr,
        config,
    )?;

    // Build application router
    let app = create_app(state);

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    info!("API Gateway listening on {}", addr);

    serve(listener, app).await?;

    Ok(())
}
