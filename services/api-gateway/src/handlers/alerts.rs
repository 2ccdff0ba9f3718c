//! Low-Stock Alert Handlers

use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{ProductRepository, ReorderRepository};
use pharmy_models::{generate_alerts, AlertSummary, LowStockAlert, ReorderSuggestion};
use pharmy_utils::{PharmyError, PharmyResult};

use crate::middleware::AuthUser;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LowStockResponse {
    pub alerts: Vec<LowStockAlert>,
    pub summary: AlertSummary,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AlertActionRequest {
    pub product_id: Uuid,
    pub action: String,
}

/// Alerts are always computed from current stock. `force_refresh=true` also
/// replaces the open reorder suggestions with the fresh set.
///
/// GET /api/v1/alerts/low-stock
pub async fn low_stock_alerts(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<LowStockQuery>,
) -> PharmyResult<Json<LowStockResponse>> {
    let snapshots = ProductRepository::new(state.pool.clone())
        .stock_snapshots(caller.tenant_id, state.today(), state.warning_days())
        .await?;
    let alerts = generate_alerts(&snapshots, &state.alert_policy());

    if query.force_refresh.unwrap_or(false) {
        let suggestions: Vec<ReorderSuggestion> = alerts
            .iter()
            .map(|alert| ReorderSuggestion::from_alert(caller.tenant_id, alert))
            .collect();
        ReorderRepository::new(state.pool.clone())
            .replace_open(caller.tenant_id, &suggestions)
            .await?;
        tracing::info!(
            tenant_id = %caller.tenant_id,
            suggestions = suggestions.len(),
            "Reorder suggestions refreshed"
        );
    }

    let summary = AlertSummary::from_alerts(&alerts);
    Ok(Json(LowStockResponse {
        alerts,
        summary,
        generated_at: Utc::now(),
    }))
}

/// POST /api/v1/alerts/low-stock
pub async fn update_alert(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<AlertActionRequest>,
) -> PharmyResult<Json<serde_json::Value>> {
    caller.require_staff()?;
    if request.action != "mark_processed" {
        return Err(PharmyError::validation(
            "action",
            format!("Unsupported action: {}", request.action),
        ));
    }

    let processed = ReorderRepository::new(state.pool.clone())
        .mark_processed(caller.tenant_id, request.product_id)
        .await?;

    Ok(Json(json!({
        "message": "Reorder suggestions marked as processed",
        "processed": processed,
    })))
}

/// GET /api/v1/alerts/reorder-suggestions
pub async fn reorder_suggestions(
    State(state): State<AppState>,
    caller: AuthUser,
) -> PharmyResult<Json<Vec<ReorderSuggestion>>> {
    let suggestions = ReorderRepository::new(state.pool.clone())
        .list_open(caller.tenant_id)
        .await?;
    Ok(Json(suggestions))
}
