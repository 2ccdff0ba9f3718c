//! Supplier Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use pharmy_database::{SupplierRepository, TenantRepository};
use pharmy_models::{
    CreateSupplier, LimitedResource, Page, PageRequest, Supplier, SupplierSummary, UpdateSupplier,
    DEFAULT_PAGE_SIZE,
};
use pharmy_utils::{validate_model, PharmyError, PharmyResult};

use super::{deleted, search_term};
use crate::middleware::{enforce_limit, load_tenant, AuthUser};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListSuppliersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

/// GET /api/v1/suppliers
pub async fn list_suppliers(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListSuppliersQuery>,
) -> PharmyResult<Json<Page<SupplierSummary>>> {
    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let search = search_term(query.search);

    let (suppliers, total) = SupplierRepository::new(state.pool.clone())
        .list(caller.tenant_id, search.as_deref(), page)
        .await?;
    Ok(Json(Page::new(suppliers, page, total)))
}

/// POST /api/v1/suppliers
pub async fn create_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreateSupplier>,
) -> PharmyResult<(StatusCode, Json<Supplier>)> {
    caller.require_staff()?;
    validate_model(&request)?;

    let suppliers = SupplierRepository::new(state.pool.clone());
    if suppliers
        .find_by_name(caller.tenant_id, request.name.trim(), None)
        .await?
        .is_some()
    {
        return Err(PharmyError::conflict("A supplier with this name already exists"));
    }

    let context = load_tenant(&state, &caller).await?;
    let usage = TenantRepository::new(state.pool.clone())
        .usage(caller.tenant_id, Utc::now())
        .await?;
    enforce_limit(&state, context.tier, LimitedResource::Suppliers, usage.suppliers)?;

    let supplier = Supplier::from_request(caller.tenant_id, request);
    suppliers.create(&supplier).await?;

    tracing::info!(supplier_id = %supplier.id, "Supplier created");
    Ok((StatusCode::CREATED, Json(supplier)))
}

/// GET /api/v1/suppliers/:id
pub async fn get_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<Supplier>> {
    let supplier = SupplierRepository::new(state.pool.clone())
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Supplier"))?;
    Ok(Json(supplier))
}

/// PUT /api/v1/suppliers/:id
pub async fn update_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSupplier>,
) -> PharmyResult<Json<Supplier>> {
    caller.require_staff()?;
    validate_model(&request)?;

    let suppliers = SupplierRepository::new(state.pool.clone());
    let mut supplier = suppliers
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Supplier"))?;

    if let Some(name) = &request.name {
        if suppliers
            .find_by_name(caller.tenant_id, name.trim(), Some(id))
            .await?
            .is_some()
        {
            return Err(PharmyError::conflict("A supplier with this name already exists"));
        }
    }

    supplier.apply(request);
    suppliers.update(&supplier).await?;
    Ok(Json(supplier))
}

/// DELETE /api/v1/suppliers/:id
pub async fn delete_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<serde_json::Value>> {
    caller.require_admin()?;

    let suppliers = SupplierRepository::new(state.pool.clone());
    if suppliers.find_by_id(caller.tenant_id, id).await?.is_none() {
        return Err(PharmyError::not_found("Supplier"));
    }
    if suppliers.has_batches(caller.tenant_id, id).await? {
        return Err(PharmyError::validation(
            "supplier",
            "Cannot delete a supplier that has batches",
        ));
    }
    if !suppliers.delete(caller.tenant_id, id).await? {
        return Err(PharmyError::not_found("Supplier"));
    }

    Ok(deleted("Supplier"))
}
