//! Audit Trail Handlers

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use pharmy_database::{AuditFilter, AuditRepository};
use pharmy_models::{AuditEntry, ChainVerification, Feature, Page, PageRequest, DEFAULT_PAGE_SIZE};
use pharmy_utils::PharmyResult;

use super::search_term;
use crate::middleware::{load_tenant, AuthUser};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
}

/// GET /api/v1/audit
pub async fn list_audit_entries(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<AuditQuery>,
) -> PharmyResult<Json<Page<AuditEntry>>> {
    caller.require_admin()?;
    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::Compliance)?;

    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let filter = AuditFilter {
        entity_type: search_term(query.entity_type).map(|t| t.to_lowercase()),
        entity_id: query.entity_id,
    };

    let (entries, total) = AuditRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter, page)
        .await?;
    Ok(Json(Page::new(entries, page, total)))
}

/// Recomputes every hash in the tenant's chain.
///
/// POST /api/v1/audit/verify
pub async fn verify_audit_chain(
    State(state): State<AppState>,
    caller: AuthUser,
) -> PharmyResult<Json<ChainVerification>> {
    caller.require_admin()?;

    let verification = AuditRepository::new(state.pool.clone())
        .verify(caller.tenant_id)
        .await?;
    tracing::info!(
        tenant_id = %caller.tenant_id,
        valid = verification.is_valid,
        entries = verification.entries_verified,
        "Audit chain verified"
    );
    Ok(Json(verification))
}
