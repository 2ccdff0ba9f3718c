//! Pharmy API Gateway
//!
//! HTTP surface of the pharmacy backend: authentication, catalogue, stock,
//! prescriptions, billing, subscription gating and reports.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use chrono::{NaiveDate, Utc};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use pharmy_database::{PostgresPool, SessionStore};
use pharmy_models::AlertPolicy;
use pharmy_utils::mailer::{Mailer, SmtpClient};
use pharmy_utils::{rx::OcrClient, AppConfig, PasswordHasher, TokenService};

pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;

use metrics::Metrics;
use middleware::*;

#[derive(Clone)]
pub struct AppState {
    pub pool: PostgresPool,
    pub sessions: Arc<dyn SessionStore>,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
    pub ocr: OcrClient,
    pub mailer: Arc<dyn Mailer>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        pool: PostgresPool,
        sessions: Arc<dyn SessionStore>,
        ocr: OcrClient,
        config: AppConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            pool,
            sessions,
            tokens: TokenService::from_config(&config.auth),
            hasher: PasswordHasher::default(),
            ocr,
            mailer: Arc::new(SmtpClient::from_config(&config.email)?),
            metrics: Arc::new(Metrics::new(&config.monitoring.prometheus_namespace)?),
            config: Arc::new(config),
        })
    }

    /// Replaces the SMTP mailer, e.g. with an outbox in tests.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            min_reorder_quantity: self.config.inventory.min_reorder_quantity,
            assumed_daily_usage: self.config.inventory.assumed_daily_usage,
        }
    }

    pub fn warning_days(&self) -> i64 {
        self.config.inventory.expiry_warning_days
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    let mut app = Router::new().route("/health", get(health_check));
    if config.monitoring.metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app
        // API routes
        .nest("/api/v1", routes::create_api_routes())
        // Middleware stack
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout_seconds)))
                .layer(CompressionLayer::new())
                .layer(cors_layer(&config.server.cors_origins))
                .layer(DefaultBodyLimit::max(config.server.max_request_size))
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    error_handling_middleware,
                )),
        )
        .with_state(state)
}

/// Credentialed CORS needs explicit origins; `*` falls back to any origin
/// without credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let explicit: Vec<HeaderValue> = origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if explicit.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer
            .allow_origin(AllowOrigin::list(explicit))
            .allow_credentials(true)
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "pharmy-api-gateway",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .encode()
        .unwrap_or_else(|_| "Error encoding metrics".to_string())
}
