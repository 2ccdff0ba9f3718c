//! Sales (Billing) Handlers
//!
//! Request checks happen here; stock allocation, totals and the sale number
//! are settled inside the repository transaction.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{PrescriptionRepository, ProductRepository, SaleFilter, SaleRepository, TenantRepository};
use pharmy_models::{
    AuditAction, AuditEntry, CreateSale, DraftLine, Feature, LimitedResource, Page, PageRequest, PaymentMethod,
    Prescription, PrescriptionStatus, Product, Sale, SaleDetail, SaleDraft, SaleStatus, DEFAULT_PAGE_SIZE,
};
use pharmy_utils::{end_of_day, start_of_day, validate_model, PharmyError, PharmyResult};

use super::{parse_field, record_audit, search_term};
use crate::middleware::{enforce_limit, load_tenant, require_feature, AuthUser};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListSalesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
}

/// Stock is drawn first-expiry-first-out unless an item names its batch.
///
/// POST /api/v1/sales
pub async fn create_sale(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreateSale>,
) -> PharmyResult<(StatusCode, Json<SaleDetail>)> {
    caller.require_staff()?;
    if request.items.is_empty() {
        return Err(PharmyError::validation("items", "A sale needs at least one item"));
    }
    validate_model(&request)?;

    let payment_method = PaymentMethod::from_str(&request.payment_method).ok_or_else(|| {
        PharmyError::validation(
            "payment_method",
            format!("Invalid payment method: {}", request.payment_method),
        )
    })?;
    let discount = request.discount.unwrap_or(0.0);

    let context = load_tenant(&state, &caller).await?;
    if payment_method != PaymentMethod::Cash {
        require_feature(context.tier, Feature::MultiPayment)?;
    }
    if discount > 0.0 {
        require_feature(context.tier, Feature::Discounts)?;
    }

    let usage = TenantRepository::new(state.pool.clone())
        .usage(caller.tenant_id, Utc::now())
        .await?;
    enforce_limit(
        &state,
        context.tier,
        LimitedResource::InvoicesPerMonth,
        usage.invoices_this_month,
    )?;

    let prescription = match request.prescription_id {
        Some(id) => Some(
            PrescriptionRepository::new(state.pool.clone())
                .find_by_id(caller.tenant_id, id)
                .await?
                .ok_or_else(|| PharmyError::not_found("Prescription"))?,
        ),
        None => None,
    };

    let product_ids: Vec<Uuid> = request.items.iter().map(|item| item.product_id).collect();
    let products: HashMap<Uuid, Product> = ProductRepository::new(state.pool.clone())
        .find_many(caller.tenant_id, &product_ids)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    let draft = build_draft(&caller, &request, payment_method, discount, &products, prescription.as_ref())?;
    let detail = SaleRepository::new(state.pool.clone())
        .create(&draft, state.today())
        .await?;

    state.metrics.sales_completed.inc();
    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::SaleCreated,
            "sale",
            detail.sale.id,
            Some(caller.user_id),
            json!({
                "sale_number": detail.sale.sale_number,
                "total_amount": detail.sale.total_amount,
                "items": detail.items.len(),
                "prescription_id": detail.sale.prescription_id,
            }),
        ),
    )
    .await;

    tracing::info!(
        sale_id = %detail.sale.id,
        sale_number = %detail.sale.sale_number,
        total = detail.sale.total_amount,
        "Sale completed"
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /api/v1/sales
pub async fn list_sales(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListSalesQuery>,
) -> PharmyResult<Json<Page<Sale>>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(PharmyError::validation("from", "Start date must not be after end date"));
        }
    }

    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let filter = SaleFilter {
        status: parse_field(query.status.as_deref(), "status", SaleStatus::from_str)?,
        from: query.from.map(start_of_day),
        to: query.to.map(end_of_day),
        search: search_term(query.search),
    };

    let (sales, total) = SaleRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter, page)
        .await?;
    Ok(Json(Page::new(sales, page, total)))
}

/// GET /api/v1/sales/:id
pub async fn get_sale(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<SaleDetail>> {
    let detail = SaleRepository::new(state.pool.clone())
        .find_detail(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Sale"))?;
    Ok(Json(detail))
}

/// Returns the sold units to their batches.
///
/// POST /api/v1/sales/:id/cancel
pub async fn cancel_sale(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<SaleDetail>> {
    caller.require_admin()?;

    let sales = SaleRepository::new(state.pool.clone());
    let sale = sales
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("Sale"))?;

    let detail = sales
        .cancel(caller.tenant_id, id, caller.user_id)
        .await?
        .ok_or_else(|| PharmyError::conflict(format!("Sale {} is already {}", sale.sale_number, sale.status.as_str())))?;

    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::SaleCancelled,
            "sale",
            id,
            Some(caller.user_id),
            json!({
                "sale_number": detail.sale.sale_number,
                "total_amount": detail.sale.total_amount,
                "restored_items": detail.items.len(),
            }),
        ),
    )
    .await;

    tracing::info!(sale_id = %id, by = %caller.user_id, "Sale cancelled");
    Ok(Json(detail))
}

/// Checks the request against the loaded products and prescription and
/// turns it into a draft for allocation.
fn build_draft(
    caller: &AuthUser,
    request: &CreateSale,
    payment_method: PaymentMethod,
    discount: f64,
    products: &HashMap<Uuid, Product>,
    prescription: Option<&Prescription>,
) -> PharmyResult<SaleDraft> {
    if let Some(prescription) = prescription {
        if prescription.status != PrescriptionStatus::Validated {
            return Err(PharmyError::validation(
                "prescription_id",
                format!("Prescription is {}, it must be validated before sale", prescription.status),
            ));
        }
    }

    let mut lines = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let product = products
            .get(&item.product_id)
            .ok_or_else(|| PharmyError::not_found("Product"))?;
        if product.requires_prescription && prescription.is_none() {
            return Err(PharmyError::validation(
                "prescription_id",
                format!("{} requires a prescription", product.name),
            ));
        }
        lines.push(DraftLine {
            product_id: product.id,
            product_name: product.name.clone(),
            batch_id: item.batch_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            gst_rate: product.gst_rate,
        });
    }

    let customer_name = request
        .customer_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| prescription.map(|p| p.patient_name.clone()));
    let customer_phone = request
        .customer_phone
        .clone()
        .or_else(|| prescription.and_then(|p| p.patient_phone.clone()));

    Ok(SaleDraft {
        tenant_id: caller.tenant_id,
        sold_by: caller.user_id,
        customer_name,
        customer_phone,
        prescription_id: prescription.map(|p| p.id),
        payment_method,
        discount,
        lines,
    })
}
