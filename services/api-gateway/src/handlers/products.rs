//! Product Catalogue Handlers
//!
//! Stock figures are not stored on products; they are rolled up from batches
//! on read, so the low-stock and expiring filters run after enrichment.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{BatchRepository, ProductFilter, ProductRepository};
use pharmy_models::{
    AuditAction, AuditEntry, Batch, BatchView, CreateProduct, LimitedResource, Page, PageRequest, Product,
    ProductCategory, ProductWithStock, StockLevel, UpdateProduct, DEFAULT_PAGE_SIZE,
};
use pharmy_utils::{validate_model, validate_sku, PharmyError, PharmyResult};

use super::{deleted, parse_field, record_audit, search_term};
use crate::middleware::{enforce_limit, load_tenant, AuthUser};
use crate::AppState;

const DEFAULT_SEARCH_LIMIT: i64 = 10;
const MAX_SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub low_stock: Option<bool>,
    pub expiring_soon: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BarcodeQuery {
    pub barcode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBarcodeRequest {
    pub product_id: Uuid,
    pub barcode: String,
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: ProductWithStock,
    pub batches: Vec<BatchView>,
}

/// GET /api/v1/products
pub async fn list_products(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListProductsQuery>,
) -> PharmyResult<Json<Page<ProductWithStock>>> {
    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let filter = ProductFilter {
        category: parse_field(query.category.as_deref(), "category", ProductCategory::from_str)?,
        search: search_term(query.search),
    };

    let products = ProductRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter)
        .await?;
    let batches = batches_by_product(&state, caller.tenant_id, &products).await?;

    let today = state.today();
    let warning_days = state.warning_days();
    let items: Vec<ProductWithStock> = products
        .into_iter()
        .map(|product| {
            let stock = StockLevel::from_batches(
                product.reorder_level,
                batches.get(&product.id).into_iter().flatten(),
                today,
                warning_days,
            );
            ProductWithStock { product, stock }
        })
        .filter(|p| !query.low_stock.unwrap_or(false) || p.stock.is_low_stock)
        .filter(|p| !query.expiring_soon.unwrap_or(false) || p.stock.expiring_soon_count > 0)
        .collect();

    Ok(Json(Page::from_vec(items, page)))
}

/// POST /api/v1/products
pub async fn create_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreateProduct>,
) -> PharmyResult<(StatusCode, Json<Product>)> {
    caller.require_staff()?;
    validate_model(&request)?;

    let sku = request.sku.trim().to_string();
    check_sku(&sku)?;
    let category = ProductCategory::from_str(&request.category)
        .ok_or_else(|| PharmyError::validation("category", format!("Invalid category: {}", request.category)))?;

    let products = ProductRepository::new(state.pool.clone());
    if products.find_by_sku(caller.tenant_id, &sku).await?.is_some() {
        return Err(PharmyError::conflict(format!("A product with SKU {} already exists", sku)));
    }

    let context = load_tenant(&state, &caller).await?;
    let current = products.count(caller.tenant_id).await?;
    enforce_limit(&state, context.tier, LimitedResource::Products, current)?;

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        tenant_id: caller.tenant_id,
        sku,
        name: request.name.trim().to_string(),
        description: request.description,
        category,
        unit: request.unit.trim().to_string(),
        hsn_code: request.hsn_code,
        gst_rate: request.gst_rate.unwrap_or(0.0),
        price: request.price,
        reorder_level: request
            .reorder_level
            .unwrap_or(state.config.inventory.default_reorder_level),
        requires_prescription: request
            .requires_prescription
            .unwrap_or(category == ProductCategory::Prescription),
        created_at: now,
        updated_at: now,
    };
    products.create(&product).await?;

    tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<ProductDetail>> {
    let product = ProductRepository::new(state.pool.clone())
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;

    let batches = BatchRepository::new(state.pool.clone())
        .list_for_products(caller.tenant_id, &[id])
        .await?;

    Ok(Json(detail(&state, product, &batches, |_| true)))
}

/// PUT /api/v1/products/:id
pub async fn update_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProduct>,
) -> PharmyResult<Json<Product>> {
    caller.require_staff()?;
    validate_model(&request)?;

    let products = ProductRepository::new(state.pool.clone());
    let mut product = products
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;

    if let Some(sku) = &request.sku {
        let sku = sku.trim().to_string();
        check_sku(&sku)?;
        if sku != product.sku {
            ensure_sku_free(&products, caller.tenant_id, &sku, id).await?;
            product.sku = sku;
        }
    }
    if let Some(category) = &request.category {
        product.category = ProductCategory::from_str(category)
            .ok_or_else(|| PharmyError::validation("category", format!("Invalid category: {}", category)))?;
    }
    if let Some(name) = &request.name {
        product.name = name.trim().to_string();
    }
    if request.description.is_some() {
        product.description = request.description;
    }
    if let Some(unit) = &request.unit {
        product.unit = unit.trim().to_string();
    }
    if request.hsn_code.is_some() {
        product.hsn_code = request.hsn_code;
    }
    if let Some(gst_rate) = request.gst_rate {
        product.gst_rate = gst_rate;
    }
    if let Some(price) = request.price {
        product.price = price;
    }
    if let Some(reorder_level) = request.reorder_level {
        product.reorder_level = reorder_level;
    }
    if let Some(requires_prescription) = request.requires_prescription {
        product.requires_prescription = requires_prescription;
    }
    product.updated_at = Utc::now();

    products.update(&product).await?;
    Ok(Json(product))
}

/// Products with sales or prescriptions behind them cannot be removed.
///
/// DELETE /api/v1/products/:id
pub async fn delete_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<serde_json::Value>> {
    caller.require_admin()?;

    let products = ProductRepository::new(state.pool.clone());
    let product = products
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;

    if products.has_history(caller.tenant_id, id).await? {
        return Err(PharmyError::validation(
            "product",
            "Cannot delete a product with sales or prescription history",
        ));
    }
    if !products.delete(caller.tenant_id, id).await? {
        return Err(PharmyError::not_found("Product"));
    }

    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::ProductDeleted,
            "product",
            id,
            Some(caller.user_id),
            json!({ "sku": product.sku, "name": product.name }),
        ),
    )
    .await;

    Ok(deleted("Product"))
}

/// Point-of-sale lookup; only sellable batches are returned.
///
/// GET /api/v1/products/search
pub async fn search_products(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<SearchQuery>,
) -> PharmyResult<Json<Vec<ProductDetail>>> {
    let term = search_term(query.q)
        .ok_or_else(|| PharmyError::validation("q", "Search query is required"))?;
    let category = parse_field(query.category.as_deref(), "category", ProductCategory::from_str)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let products = ProductRepository::new(state.pool.clone())
        .search(caller.tenant_id, &term, category, limit)
        .await?;
    let batches = batches_by_product(&state, caller.tenant_id, &products).await?;

    let today = state.today();
    let results = products
        .into_iter()
        .map(|product| {
            let own = batches.get(&product.id).cloned().unwrap_or_default();
            detail(&state, product, &own, |b| b.quantity > 0 && !b.is_expired(today))
        })
        .collect();

    Ok(Json(results))
}

/// GET /api/v1/products/barcode?barcode=
pub async fn find_by_barcode(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<BarcodeQuery>,
) -> PharmyResult<Json<ProductDetail>> {
    let barcode = search_term(query.barcode)
        .ok_or_else(|| PharmyError::validation("barcode", "Barcode is required"))?;

    let product = ProductRepository::new(state.pool.clone())
        .find_by_sku(caller.tenant_id, &barcode)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;
    let batches = BatchRepository::new(state.pool.clone())
        .list_for_products(caller.tenant_id, &[product.id])
        .await?;

    let today = state.today();
    Ok(Json(detail(&state, product, &batches, |b| {
        b.quantity > 0 && !b.is_expired(today)
    })))
}

/// Barcodes are stored as the product SKU.
///
/// POST /api/v1/products/barcode
pub async fn assign_barcode(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<AssignBarcodeRequest>,
) -> PharmyResult<Json<Product>> {
    caller.require_staff()?;

    let barcode = request.barcode.trim().to_string();
    if barcode.len() < 3 || barcode.len() > 50 {
        return Err(PharmyError::validation("barcode", "Barcode must be between 3 and 50 characters"));
    }
    check_sku(&barcode)?;

    let products = ProductRepository::new(state.pool.clone());
    let mut product = products
        .find_by_id(caller.tenant_id, request.product_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Product"))?;

    if product.sku != barcode {
        ensure_sku_free(&products, caller.tenant_id, &barcode, product.id).await?;
        product.sku = barcode;
        product.updated_at = Utc::now();
        products.update(&product).await?;
    }

    Ok(Json(product))
}

fn check_sku(sku: &str) -> PharmyResult<()> {
    validate_sku(sku).map_err(|_| {
        PharmyError::validation("sku", "SKU may contain letters, digits and - _ . / only")
    })
}

async fn ensure_sku_free(
    products: &ProductRepository,
    tenant_id: Uuid,
    sku: &str,
    product_id: Uuid,
) -> PharmyResult<()> {
    match products.find_by_sku(tenant_id, sku).await? {
        Some(other) if other.id != product_id => Err(PharmyError::conflict(format!(
            "SKU {} is already used by {}",
            sku, other.name
        ))),
        _ => Ok(()),
    }
}

async fn batches_by_product(
    state: &AppState,
    tenant_id: Uuid,
    products: &[Product],
) -> PharmyResult<HashMap<Uuid, Vec<Batch>>> {
    let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
    let mut grouped: HashMap<Uuid, Vec<Batch>> = HashMap::new();
    if ids.is_empty() {
        return Ok(grouped);
    }

    let batches = BatchRepository::new(state.pool.clone())
        .list_for_products(tenant_id, &ids)
        .await?;
    for batch in batches {
        grouped.entry(batch.product_id).or_default().push(batch);
    }
    Ok(grouped)
}

/// Batches arrive ordered by expiry; `keep` selects which ones are listed.
/// Stock figures always use every batch.
fn detail(state: &AppState, product: Product, batches: &[Batch], keep: impl Fn(&Batch) -> bool) -> ProductDetail {
    let today = state.today();
    let warning_days = state.warning_days();
    let stock = StockLevel::from_batches(product.reorder_level, batches, today, warning_days);
    let views = batches
        .iter()
        .filter(|b| keep(b))
        .map(|b| b.view(today, warning_days, product.reorder_level))
        .collect();

    ProductDetail {
        product: ProductWithStock { product, stock },
        batches: views,
    }
}
