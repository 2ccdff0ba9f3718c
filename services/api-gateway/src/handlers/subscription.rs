//! Pharmacy Account and Subscription Handlers
//!
//! The plan catalogue is public. Usage is counted live on every request.

use std::collections::BTreeMap;

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use pharmy_database::TenantRepository;
use pharmy_models::{
    plan_catalogue, AuditAction, AuditEntry, Feature, PlanInfo, SubscriptionTier, Tenant, TierLimits,
    TierUsage, UpdateTenant,
};
use pharmy_utils::{validate_model, PharmyError, PharmyResult};

use super::record_audit;
use crate::middleware::{load_tenant, AuthUser};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub tier: SubscriptionTier,
    pub plan_name: &'static str,
    /// Tier stored on the account, which differs from `tier` once a paid plan lapses.
    pub subscribed_tier: SubscriptionTier,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub limits: TierLimits,
    pub usage: TierUsage,
    pub features: BTreeMap<&'static str, bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeSubscriptionRequest {
    pub tier: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/subscription/plans
pub async fn list_plans() -> Json<Vec<PlanInfo>> {
    Json(plan_catalogue())
}

/// GET /api/v1/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    caller: AuthUser,
) -> PharmyResult<Json<SubscriptionResponse>> {
    let context = load_tenant(&state, &caller).await?;
    let usage = TenantRepository::new(state.pool.clone())
        .usage(caller.tenant_id, Utc::now())
        .await?;

    Ok(Json(describe(&context.tenant, context.tier, usage, Vec::new())))
}

/// Downgrades are allowed even when usage is over the new limits; the
/// response lists what is over and new creations stay blocked.
///
/// PUT /api/v1/subscription
pub async fn change_subscription(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<ChangeSubscriptionRequest>,
) -> PharmyResult<Json<SubscriptionResponse>> {
    caller.require_admin()?;

    let tier = SubscriptionTier::from_str(&request.tier).ok_or_else(|| {
        PharmyError::validation("tier", "Tier must be one of community, basic, pro, enterprise")
    })?;
    if let Some(expires_at) = request.expires_at {
        if expires_at <= Utc::now() {
            return Err(PharmyError::validation("expires_at", "Expiry must be in the future"));
        }
    }

    let current = load_tenant(&state, &caller).await?;
    let tenants = TenantRepository::new(state.pool.clone());
    let tenant = tenants
        .update_tier(caller.tenant_id, tier, request.expires_at)
        .await?
        .ok_or_else(|| PharmyError::not_found("Tenant"))?;

    let now = Utc::now();
    let usage = tenants.usage(caller.tenant_id, now).await?;
    let effective = tenant.effective_tier(now);
    let limits = effective.limits();
    let warnings = usage
        .over_limits(&limits)
        .into_iter()
        .map(|resource| {
            format!(
                "Current {} ({}) exceed the {} plan limit of {}",
                resource.as_str().replace('_', " "),
                usage.get(resource),
                effective.display_name(),
                limits.limit_for(resource).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>();

    record_audit(
        &state,
        AuditEntry::new(
            caller.tenant_id,
            AuditAction::SubscriptionChanged,
            "tenant",
            caller.tenant_id,
            Some(caller.user_id),
            json!({
                "from": current.tenant.tier.as_str(),
                "to": tier.as_str(),
                "expires_at": request.expires_at,
            }),
        ),
    )
    .await;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        from = %current.tenant.tier,
        to = %tier,
        warnings = warnings.len(),
        "Subscription changed"
    );

    Ok(Json(describe(&tenant, effective, usage, warnings)))
}

/// GET /api/v1/tenant
pub async fn get_tenant(State(state): State<AppState>, caller: AuthUser) -> PharmyResult<Json<Tenant>> {
    Ok(Json(load_tenant(&state, &caller).await?.tenant))
}

/// PUT /api/v1/tenant
pub async fn update_tenant(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<UpdateTenant>,
) -> PharmyResult<Json<Tenant>> {
    caller.require_admin()?;
    validate_model(&request)?;

    let tenant = TenantRepository::new(state.pool.clone())
        .update_details(caller.tenant_id, &request)
        .await?
        .ok_or_else(|| PharmyError::not_found("Tenant"))?;
    Ok(Json(tenant))
}

fn describe(
    tenant: &Tenant,
    tier: SubscriptionTier,
    usage: TierUsage,
    warnings: Vec<String>,
) -> SubscriptionResponse {
    SubscriptionResponse {
        tier,
        plan_name: tier.display_name(),
        subscribed_tier: tenant.tier,
        is_active: tenant.is_active,
        expires_at: tenant.subscription_expires_at,
        limits: tier.limits(),
        usage,
        features: Feature::ALL
            .iter()
            .map(|f| (f.as_str(), tier.has_feature(*f)))
            .collect(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_every_feature() {
        let tenant = Tenant::new("Corner Pharmacy".to_string());
        let response = describe(&tenant, SubscriptionTier::Community, TierUsage::default(), Vec::new());

        assert_eq!(response.features.len(), Feature::ALL.len());
        assert_eq!(response.features["notifications"], true);
        assert_eq!(response.features["discounts"], false);
        assert_eq!(response.limits.max_products, Some(20));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("warnings").is_none());
        assert_eq!(json["tier"], "COMMUNITY");
    }
}
