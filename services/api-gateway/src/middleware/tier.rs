//! Subscription gates: tenant status, feature flags and resource limits.

use chrono::Utc;

use pharmy_database::TenantRepository;
use pharmy_models::{Feature, LimitedResource, SubscriptionTier, Tenant};
use pharmy_utils::{PharmyError, PharmyResult};

use super::AuthUser;
use crate::AppState;

/// The caller's tenant with the tier in force right now.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub tier: SubscriptionTier,
}

impl TenantContext {
    pub fn require_feature(&self, feature: Feature) -> PharmyResult<()> {
        require_feature(self.tier, feature)
    }
}

pub async fn load_tenant(state: &AppState, user: &AuthUser) -> PharmyResult<TenantContext> {
    let tenant = TenantRepository::new(state.pool.clone())
        .find_by_id(user.tenant_id)
        .await?
        .ok_or_else(|| PharmyError::authentication("Account no longer exists"))?;

    if !tenant.is_active {
        return Err(PharmyError::authorization("Pharmacy account is inactive"));
    }

    let tier = tenant.effective_tier(Utc::now());
    Ok(TenantContext { tenant, tier })
}

pub fn require_feature(tier: SubscriptionTier, feature: Feature) -> PharmyResult<()> {
    if tier.has_feature(feature) {
        Ok(())
    } else {
        Err(PharmyError::feature_unavailable(feature.as_str(), tier.display_name()))
    }
}

/// `current` is the live count before the new record is created.
pub fn enforce_limit(
    state: &AppState,
    tier: SubscriptionTier,
    resource: LimitedResource,
    current: i64,
) -> PharmyResult<()> {
    tier.check_limit(resource, current).map_err(|err| {
        state
            .metrics
            .limit_rejections
            .with_label_values(&[resource.as_str()])
            .inc();
        tracing::info!(resource = resource.as_str(), limit = err.limit, tier = %tier, "Tier limit reached");
        PharmyError::limit_exceeded(resource.as_str(), err.limit, tier.display_name())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_gate() {
        assert!(require_feature(SubscriptionTier::Community, Feature::Notifications).is_ok());

        let err = require_feature(SubscriptionTier::Community, Feature::PrescriptionHandling).unwrap_err();
        assert_eq!(err.http_status_code(), 403);
        assert_eq!(err.error_code(), "FEATURE_UNAVAILABLE");

        assert!(require_feature(SubscriptionTier::Basic, Feature::MultiBranch).is_err());
        assert!(require_feature(SubscriptionTier::Pro, Feature::MultiBranch).is_ok());
    }
}
