//! Tenancy and subscription plan models.
//!
//! A tenant is one pharmacy organisation. Every other row in the system is
//! owned by exactly one tenant, and the tenant's subscription tier bounds how
//! many users, products, suppliers and invoices it may create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub drug_license_number: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tier: SubscriptionTier,
    pub is_active: bool,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            drug_license_number: None,
            phone: None,
            address: None,
            tier: SubscriptionTier::Community,
            is_active: true,
            subscription_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tier in force right now. A lapsed paid plan falls back to Community.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        match self.subscription_expires_at {
            Some(expires) if expires <= now => SubscriptionTier::Community,
            _ => self.tier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Community,
    Basic,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Community,
        SubscriptionTier::Basic,
        SubscriptionTier::Pro,
        SubscriptionTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Community => "COMMUNITY",
            Self::Basic => "BASIC",
            Self::Pro => "PRO",
            Self::Enterprise => "ENTERPRISE",
        }
    }

    /// Accepts catalogue ids, stored names and the legacy plan names.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "community" | "free" => Some(Self::Community),
            "basic" | "premium" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "enterprise" | "custom" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Self::Community => TierLimits {
                max_admins: Some(1),
                max_pharmacists: Some(1),
                max_products: Some(20),
                max_invoices_per_month: Some(5),
                max_suppliers: Some(5),
            },
            Self::Basic => TierLimits {
                max_admins: Some(3),
                max_pharmacists: Some(10),
                max_products: Some(1000),
                max_invoices_per_month: Some(1000),
                max_suppliers: Some(50),
            },
            Self::Pro => TierLimits {
                max_admins: Some(10),
                max_pharmacists: Some(100),
                max_products: None,
                max_invoices_per_month: None,
                max_suppliers: None,
            },
            Self::Enterprise => TierLimits::unlimited(),
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        match self {
            Self::Community => matches!(feature, Feature::Notifications),
            Self::Basic => !matches!(feature, Feature::MultiBranch),
            Self::Pro | Self::Enterprise => true,
        }
    }

    pub fn features(&self) -> Vec<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| self.has_feature(*f))
            .collect()
    }

    /// Returns `Ok` when one more `resource` may be created given `current` existing ones.
    pub fn check_limit(&self, resource: LimitedResource, current: i64) -> Result<(), TierLimitError> {
        check_limit(self.limits().limit_for(resource), current).map_err(|limit| TierLimitError {
            resource,
            limit,
            current,
            tier: *self,
        })
    }

    pub fn catalogue_id(&self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Community => "Community",
            Self::Basic => "Basic",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_admins: Option<i64>,
    pub max_pharmacists: Option<i64>,
    pub max_products: Option<i64>,
    pub max_invoices_per_month: Option<i64>,
    pub max_suppliers: Option<i64>,
}

impl TierLimits {
    pub fn unlimited() -> Self {
        Self {
            max_admins: None,
            max_pharmacists: None,
            max_products: None,
            max_invoices_per_month: None,
            max_suppliers: None,
        }
    }

    pub fn limit_for(&self, resource: LimitedResource) -> Option<i64> {
        match resource {
            LimitedResource::Admins => self.max_admins,
            LimitedResource::Pharmacists => self.max_pharmacists,
            LimitedResource::Products => self.max_products,
            LimitedResource::InvoicesPerMonth => self.max_invoices_per_month,
            LimitedResource::Suppliers => self.max_suppliers,
        }
    }
}

/// Allowed iff unlimited or `current < limit`. The error carries the limit.
pub fn check_limit(limit: Option<i64>, current: i64) -> Result<(), i64> {
    match limit {
        None => Ok(()),
        Some(max) if current < max => Ok(()),
        Some(max) => Err(max),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitedResource {
    Admins,
    Pharmacists,
    Products,
    InvoicesPerMonth,
    Suppliers,
}

impl LimitedResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admins => "admins",
            Self::Pharmacists => "pharmacists",
            Self::Products => "products",
            Self::InvoicesPerMonth => "invoices_per_month",
            Self::Suppliers => "suppliers",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} limit of {limit} reached on the {tier} plan (current: {current})", .resource.as_str())]
pub struct TierLimitError {
    pub resource: LimitedResource,
    pub limit: i64,
    pub current: i64,
    pub tier: SubscriptionTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PrescriptionHandling,
    MultiPayment,
    Discounts,
    AdvancedReports,
    Compliance,
    MedicineInfo,
    Notifications,
    Integrations,
    AiFeatures,
    Security,
    Ocr,
    MultiBranch,
}

impl Feature {
    pub const ALL: [Feature; 12] = [
        Feature::PrescriptionHandling,
        Feature::MultiPayment,
        Feature::Discounts,
        Feature::AdvancedReports,
        Feature::Compliance,
        Feature::MedicineInfo,
        Feature::Notifications,
        Feature::Integrations,
        Feature::AiFeatures,
        Feature::Security,
        Feature::Ocr,
        Feature::MultiBranch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrescriptionHandling => "prescription_handling",
            Self::MultiPayment => "multi_payment",
            Self::Discounts => "discounts",
            Self::AdvancedReports => "advanced_reports",
            Self::Compliance => "compliance",
            Self::MedicineInfo => "medicine_info",
            Self::Notifications => "notifications",
            Self::Integrations => "integrations",
            Self::AiFeatures => "ai_features",
            Self::Security => "security",
            Self::Ocr => "ocr",
            Self::MultiBranch => "multi_branch",
        }
    }
}

/// Live usage counts for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub admins: i64,
    pub pharmacists: i64,
    pub products: i64,
    pub invoices_this_month: i64,
    pub suppliers: i64,
}

impl TierUsage {
    pub fn get(&self, resource: LimitedResource) -> i64 {
        match resource {
            LimitedResource::Admins => self.admins,
            LimitedResource::Pharmacists => self.pharmacists,
            LimitedResource::Products => self.products,
            LimitedResource::InvoicesPerMonth => self.invoices_this_month,
            LimitedResource::Suppliers => self.suppliers,
        }
    }

    /// Resources whose usage already exceeds what `limits` allows.
    pub fn over_limits(&self, limits: &TierLimits) -> Vec<LimitedResource> {
        [
            LimitedResource::Admins,
            LimitedResource::Pharmacists,
            LimitedResource::Products,
            LimitedResource::InvoicesPerMonth,
            LimitedResource::Suppliers,
        ]
        .into_iter()
        .filter(|r| matches!(limits.limit_for(*r), Some(max) if self.get(*r) > max))
        .collect()
    }
}

/// One entry of the public plan catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanInfo {
    pub id: String,
    pub tier: SubscriptionTier,
    pub name: String,
    pub description: String,
    /// `None` for custom pricing.
    pub monthly_price_usd: Option<f64>,
    pub limits: TierLimits,
    pub features: Vec<Feature>,
    pub is_popular: bool,
}

pub fn plan_catalogue() -> Vec<PlanInfo> {
    SubscriptionTier::ALL
        .iter()
        .map(|tier| {
            let (description, price) = match tier {
                SubscriptionTier::Community => ("For single-counter pharmacies getting started", Some(0.0)),
                SubscriptionTier::Basic => ("For growing pharmacies with a small team", Some(49.0)),
                SubscriptionTier::Pro => ("For busy pharmacies that need scale", Some(99.0)),
                SubscriptionTier::Enterprise => ("For chains with custom requirements", None),
            };
            PlanInfo {
                id: tier.catalogue_id().to_string(),
                tier: *tier,
                name: tier.display_name().to_string(),
                description: description.to_string(),
                monthly_price_usd: price,
                limits: tier.limits(),
                features: tier.features(),
                is_popular: *tier == SubscriptionTier::Pro,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTenant {
    #[validate(length(min = 2, max = 200, message = "Pharmacy name must be between 2 and 200 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 50, message = "Drug license number is too long"))]
    pub drug_license_number: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Phone must be between 10 and 15 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_community_limits() {
        let limits = SubscriptionTier::Community.limits();
        assert_eq!(limits.max_products, Some(20));
        assert_eq!(limits.max_invoices_per_month, Some(5));
        assert_eq!(limits.max_admins, Some(1));
    }

    #[test]
    fn test_check_limit_boundary() {
        assert!(check_limit(Some(20), 19).is_ok());
        assert_eq!(check_limit(Some(20), 20), Err(20));
        assert!(check_limit(None, i64::MAX).is_ok());
    }

    #[test]
    fn test_tier_check_reports_context() {
        let err = SubscriptionTier::Community
            .check_limit(LimitedResource::Suppliers, 5)
            .unwrap_err();
        assert_eq!(err.limit, 5);
        assert_eq!(err.tier, SubscriptionTier::Community);
        assert!(SubscriptionTier::Pro.check_limit(LimitedResource::Suppliers, 10_000).is_ok());
    }

    #[test]
    fn test_feature_matrix() {
        assert!(SubscriptionTier::Community.has_feature(Feature::Notifications));
        assert!(!SubscriptionTier::Community.has_feature(Feature::PrescriptionHandling));
        assert!(SubscriptionTier::Basic.has_feature(Feature::Compliance));
        assert!(!SubscriptionTier::Basic.has_feature(Feature::MultiBranch));
        assert!(SubscriptionTier::Enterprise.has_feature(Feature::MultiBranch));
    }

    #[test]
    fn test_paid_only_features() {
        for feature in [
            Feature::MedicineInfo,
            Feature::Integrations,
            Feature::AiFeatures,
            Feature::Security,
        ] {
            assert!(!SubscriptionTier::Community.has_feature(feature), "{}", feature.as_str());
            assert!(SubscriptionTier::Basic.has_feature(feature), "{}", feature.as_str());
            assert!(SubscriptionTier::Pro.has_feature(feature), "{}", feature.as_str());
        }
        assert_eq!(SubscriptionTier::Community.features(), vec![Feature::Notifications]);
        assert_eq!(SubscriptionTier::Basic.features().len(), Feature::ALL.len() - 1);
    }

    #[test]
    fn test_tier_parsing_accepts_legacy_names() {
        assert_eq!(SubscriptionTier::from_str("free"), Some(SubscriptionTier::Community));
        assert_eq!(SubscriptionTier::from_str("PREMIUM"), Some(SubscriptionTier::Basic));
        assert_eq!(SubscriptionTier::from_str("pro"), Some(SubscriptionTier::Pro));
        assert_eq!(SubscriptionTier::from_str("custom"), Some(SubscriptionTier::Enterprise));
        assert_eq!(SubscriptionTier::from_str("gold"), None);
    }

    #[test]
    fn test_expired_plan_falls_back_to_community() {
        let now = Utc::now();
        let mut tenant = Tenant::new("Corner Pharmacy".to_string());
        tenant.tier = SubscriptionTier::Pro;
        tenant.subscription_expires_at = Some(now - Duration::days(1));
        assert_eq!(tenant.effective_tier(now), SubscriptionTier::Community);

        tenant.subscription_expires_at = Some(now + Duration::days(30));
        assert_eq!(tenant.effective_tier(now), SubscriptionTier::Pro);
    }

    #[test]
    fn test_over_limits_after_downgrade() {
        let usage = TierUsage {
            admins: 2,
            pharmacists: 1,
            products: 25,
            invoices_this_month: 0,
            suppliers: 5,
        };
        let over = usage.over_limits(&SubscriptionTier::Community.limits());
        assert_eq!(over, vec![LimitedResource::Admins, LimitedResource::Products]);
    }

    #[test]
    fn test_catalogue_has_one_popular_plan() {
        let plans = plan_catalogue();
        assert_eq!(plans.len(), 4);
        assert_eq!(plans.iter().filter(|p| p.is_popular).count(), 1);
        assert_eq!(plans[3].monthly_price_usd, None);
    }
}
