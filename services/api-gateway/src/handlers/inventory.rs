//! Inventory Handlers
//!
//! Read-side rollups over batches and the stock movement ledger, plus manual
//! stock corrections.

use std::collections::HashSet;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{BatchRepository, MovementFilter, MovementRecord, ProductRepository, StockRepository};
use pharmy_models::{turnover_rate, AuditAction, AuditEntry, MovementType, StockAdjustment, StockMovement};
use pharmy_utils::{end_of_day, start_of_day, validate_model, PharmyError, PharmyResult};

use super::batches::BatchResponse;
use super::{parse_field, record_audit};
use crate::middleware::AuthUser;
use crate::AppState;

const DEFAULT_MOVEMENT_LIMIT: i64 = 50;
const MAX_MOVEMENT_LIMIT: i64 = 500;
const SUMMARY_LIST_SIZE: usize = 10;
const TURNOVER_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
pub struct StockSummary {
    pub total_products: usize,
    pub low_stock_products: usize,
    pub out_of_stock_products: usize,
    pub expiring_soon_products: usize,
    pub total_stock_value: f64,
    pub total_units: i64,
    pub turnover_rate: f64,
    pub low_stock: Vec<LowStockProduct>,
    pub expiring: Vec<ExpiringProduct>,
    pub recent_movements: Vec<MovementRecord>,
}

#[derive(Debug, Serialize)]
pub struct LowStockProduct {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub current_stock: i64,
    pub reorder_level: i32,
}

#[derive(Debug, Serialize)]
pub struct ExpiringProduct {
    pub product_id: Uuid,
    pub name: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub days_to_expiry: i64,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub product_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub movement_type: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AdjustmentResponse {
    pub batch: BatchResponse,
    pub movement: StockMovement,
}

/// GET /api/v1/inventory/stock
pub async fn stock_summary(
    State(state): State<AppState>,
    caller: AuthUser,
) -> PharmyResult<Json<StockSummary>> {
    let today = state.today();
    let warning_days = state.warning_days();

    let snapshots = ProductRepository::new(state.pool.clone())
        .stock_snapshots(caller.tenant_id, today, warning_days)
        .await?;
    let expiring_batches = BatchRepository::new(state.pool.clone())
        .expiring(caller.tenant_id, today, today + Duration::days(warning_days), None)
        .await?;
    let stock = StockRepository::new(state.pool.clone());
    let totals = stock
        .totals(caller.tenant_id, Utc::now() - Duration::days(TURNOVER_WINDOW_DAYS))
        .await?;
    let recent_movements = stock.recent(caller.tenant_id, SUMMARY_LIST_SIZE as i64).await?;

    let mut low: Vec<_> = snapshots
        .iter()
        .filter(|s| s.current_stock <= i64::from(s.reorder_level))
        .collect();
    low.sort_by(|a, b| {
        a.current_stock
            .cmp(&b.current_stock)
            .then_with(|| a.product_name.cmp(&b.product_name))
    });

    // Batches arrive soonest-expiry first, so the first one seen per product is its nearest.
    let mut seen = HashSet::new();
    let expiring: Vec<ExpiringProduct> = expiring_batches
        .into_iter()
        .filter(|listing| seen.insert(listing.batch.product_id))
        .take(SUMMARY_LIST_SIZE)
        .map(|listing| ExpiringProduct {
            product_id: listing.batch.product_id,
            name: listing.product_name,
            days_to_expiry: listing.batch.days_to_expiry(today),
            batch_number: listing.batch.batch_number,
            expiry_date: listing.batch.expiry_date,
            quantity: listing.batch.quantity,
        })
        .collect();

    Ok(Json(StockSummary {
        total_products: snapshots.len(),
        low_stock_products: low.len(),
        out_of_stock_products: snapshots.iter().filter(|s| s.current_stock <= 0).count(),
        expiring_soon_products: snapshots.iter().filter(|s| s.expiring_soon_stock > 0).count(),
        total_stock_value: (totals.total_value * 100.0).round() / 100.0,
        total_units: totals.total_units,
        turnover_rate: turnover_rate(
            totals.units_out_last_7_days,
            TURNOVER_WINDOW_DAYS,
            totals.total_units,
        ),
        low_stock: low
            .into_iter()
            .take(SUMMARY_LIST_SIZE)
            .map(|s| LowStockProduct {
                product_id: s.product_id,
                name: s.product_name.clone(),
                sku: s.sku.clone(),
                current_stock: s.current_stock,
                reorder_level: s.reorder_level,
            })
            .collect(),
        expiring,
        recent_movements,
    }))
}

/// GET /api/v1/inventory/movements
pub async fn list_movements(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<MovementsQuery>,
) -> PharmyResult<Json<Vec<MovementRecord>>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(PharmyError::validation("from", "Start date must not be after end date"));
        }
    }

    let filter = MovementFilter {
        product_id: query.product_id,
        batch_id: query.batch_id,
        movement_type: parse_field(query.movement_type.as_deref(), "movement_type", MovementType::from_str)?,
        from: query.from.map(start_of_day),
        to: query.to.map(end_of_day),
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MOVEMENT_LIMIT)
        .clamp(1, MAX_MOVEMENT_LIMIT);

    let movements = StockRepository::new(state.pool.clone())
        .movements(caller.tenant_id, &filter, limit)
        .await?;
    Ok(Json(movements))
}

/// GET /api/v1/inventory/expiring
pub async fn expiring_batches(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ExpiringQuery>,
) -> PharmyResult<Json<Vec<BatchResponse>>> {
    let days = query.days.unwrap_or_else(|| state.warning_days());
    if !(0..=3650).contains(&days) {
        return Err(PharmyError::validation("days", "Days must be between 0 and 3650"));
    }

    let today = state.today();
    let listings = BatchRepository::new(state.pool.clone())
        .expiring(caller.tenant_id, today, today + Duration::days(days), None)
        .await?;
    Ok(Json(
        listings
            .into_iter()
            .map(|listing| BatchResponse::from_listing(&state, listing))
            .collect(),
    ))
}

/// Corrections for breakage, counting errors and the like. The resulting
/// quantity may not go below zero.
///
/// POST /api/v1/inventory/adjustments
pub async fn adjust_stock(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<StockAdjustment>,
) -> PharmyResult<(StatusCode, Json<AdjustmentResponse>)> {
    caller.require_staff()?;
    validate_model(&request)?;
    if request.quantity_change == 0 {
        return Err(PharmyError::validation("quantity_change", "Quantity change must not be zero"));
    }

    let batches = BatchRepository::new(state.pool.clone());
    let (batch, movement) = batches
        .adjust(caller.tenant_id, &request, caller.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;

    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::StockAdjusted,
            "batch",
            batch.id,
            Some(caller.user_id),
            json!({
                "batch_number": batch.batch_number,
                "quantity_change": request.quantity_change,
                "resulting_quantity": batch.quantity,
                "reason": movement.reason,
            }),
        ),
    )
    .await;

    tracing::info!(
        batch_id = %batch.id,
        change = request.quantity_change,
        resulting = batch.quantity,
        "Stock adjusted"
    );

    let listing = batches
        .find_by_id(caller.tenant_id, batch.id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;
    Ok((
        StatusCode::CREATED,
        Json(AdjustmentResponse {
            batch: BatchResponse::from_listing(&state, listing),
            movement,
        }),
    ))
}
