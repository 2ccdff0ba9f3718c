//! Batch Handlers
//!
//! Stock receipts. Creating a batch books an `IN` movement and quantity edits
//! book an `ADJUSTMENT`, both inside the repository transaction.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{BatchFilter, BatchListing, BatchRepository, ProductRepository, SupplierRepository};
use pharmy_models::{
    validate_batch_dates, AuditAction, AuditEntry, Batch, BatchDateError, BatchView, CreateBatch, Page,
    PageRequest, UpdateBatch, DEFAULT_PAGE_SIZE,
};
use pharmy_utils::{validate_model, PharmyError, PharmyResult};

use super::{deleted, record_audit};
use crate::middleware::AuthUser;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub product_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub expiring_soon: Option<bool>,
    pub low_stock: Option<bool>,
}

/// A batch with its expiry flags and the names needed to display it.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub batch: BatchView,
    pub product_name: String,
    pub sku: String,
    pub supplier_name: String,
}

impl BatchResponse {
    pub(crate) fn from_listing(state: &AppState, listing: BatchListing) -> Self {
        Self {
            batch: listing
                .batch
                .view(state.today(), state.warning_days(), listing.reorder_level),
            product_name: listing.product_name,
            sku: listing.sku,
            supplier_name: listing.supplier_name,
        }
    }
}

/// GET /api/v1/batches
pub async fn list_batches(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListBatchesQuery>,
) -> PharmyResult<Json<Page<BatchResponse>>> {
    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let today = state.today();

    let filter = BatchFilter {
        product_id: query.product_id,
        supplier_id: query.supplier_id,
        expiring_by: query
            .expiring_soon
            .unwrap_or(false)
            .then(|| (today, today + Duration::days(state.warning_days()))),
        max_quantity: query
            .low_stock
            .unwrap_or(false)
            .then_some(state.config.inventory.low_batch_quantity),
    };

    let (listings, total) = BatchRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter, page)
        .await?;
    let data = listings
        .into_iter()
        .map(|listing| BatchResponse::from_listing(&state, listing))
        .collect();

    Ok(Json(Page::new(data, page, total)))
}

/// POST /api/v1/batches
pub async fn create_batch(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreateBatch>,
) -> PharmyResult<(StatusCode, Json<BatchResponse>)> {
    caller.require_staff()?;
    validate_model(&request)?;
    validate_batch_dates(request.mfg_date, request.expiry_date, state.today()).map_err(date_error)?;

    let product = ProductRepository::new(state.pool.clone())
        .find_by_id(caller.tenant_id, request.product_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;
    SupplierRepository::new(state.pool.clone())
        .find_by_id(caller.tenant_id, request.supplier_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Supplier"))?;

    let batch_number = request.batch_number.trim().to_string();
    let batches = BatchRepository::new(state.pool.clone());
    if batches
        .number_taken(caller.tenant_id, product.id, &batch_number, None)
        .await?
    {
        return Err(PharmyError::conflict(format!(
            "Batch {} already exists for {}",
            batch_number, product.name
        )));
    }

    let now = Utc::now();
    let batch = Batch {
        id: Uuid::new_v4(),
        tenant_id: caller.tenant_id,
        product_id: product.id,
        supplier_id: request.supplier_id,
        batch_number,
        mfg_date: request.mfg_date,
        expiry_date: request.expiry_date,
        quantity: request.quantity,
        cost_price: request.cost_price,
        selling_price: request.selling_price.unwrap_or(product.price),
        created_at: now,
        updated_at: now,
    };
    batches.create(&batch, caller.user_id).await?;

    tracing::info!(
        batch_id = %batch.id,
        product_id = %product.id,
        quantity = batch.quantity,
        "Batch received"
    );

    let listing = batches
        .find_by_id(caller.tenant_id, batch.id)
        .await?
        .ok_or_else(|| PharmyError::internal("Batch vanished after insert"))?;
    Ok((StatusCode::CREATED, Json(BatchResponse::from_listing(&state, listing))))
}

/// GET /api/v1/batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<BatchResponse>> {
    let listing = BatchRepository::new(state.pool.clone())
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;
    Ok(Json(BatchResponse::from_listing(&state, listing)))
}

/// PUT /api/v1/batches/:id
pub async fn update_batch(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBatch>,
) -> PharmyResult<Json<BatchResponse>> {
    caller.require_staff()?;
    validate_model(&request)?;

    let batches = BatchRepository::new(state.pool.clone());
    let current = batches
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?
        .batch;

    if let Some(number) = &request.batch_number {
        let number = number.trim();
        if number != current.batch_number
            && batches
                .number_taken(caller.tenant_id, current.product_id, number, Some(id))
                .await?
        {
            return Err(PharmyError::conflict(format!("Batch {} already exists", number)));
        }
    }

    if let Some(supplier_id) = request.supplier_id {
        SupplierRepository::new(state.pool.clone())
            .find_by_id(caller.tenant_id, supplier_id)
            .await?
            .ok_or_else(|| PharmyError::not_found("Supplier"))?;
    }

    batches
        .update(caller.tenant_id, id, &request, state.today(), caller.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;

    let listing = batches
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;
    Ok(Json(BatchResponse::from_listing(&state, listing)))
}

/// Batches that have been sold from are kept for traceability.
///
/// DELETE /api/v1/batches/:id
pub async fn delete_batch(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<serde_json::Value>> {
    caller.require_admin()?;

    let batches = BatchRepository::new(state.pool.clone());
    let listing = batches
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Batch"))?;

    if batches.has_sales(caller.tenant_id, id).await? {
        return Err(PharmyError::validation("batch", "Cannot delete a batch that has been sold from"));
    }
    if !batches.delete(caller.tenant_id, id).await? {
        return Err(PharmyError::not_found("Batch"));
    }

    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::BatchDeleted,
            "batch",
            id,
            Some(caller.user_id),
            json!({
                "batch_number": listing.batch.batch_number,
                "product": listing.product_name,
                "quantity": listing.batch.quantity,
            }),
        ),
    )
    .await;

    Ok(deleted("Batch"))
}

fn date_error(err: BatchDateError) -> PharmyError {
    PharmyError::validation(err.field(), err.to_string())
}
