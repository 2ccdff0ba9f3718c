//! # Pharmy Domain Models
//!
//! Core types shared by the API gateway, the database layer and the alert
//! notifier. Every tenant-owned record carries a `tenant_id`.
//!
//! ## Key Models
//!
//! - **Tenant / SubscriptionTier**: the pharmacy account and its plan limits and features
//! - **User / Profile**: staff accounts with USER, PHARMACIST or ADMIN roles
//! - **Product / Batch**: catalogue items and expiry-dated stock lots
//! - **Sale**: invoices drawn from batches in first-expiry-first-out order
//! - **Prescription**: uploaded prescriptions and their review status
//! - **LowStockAlert / ReorderSuggestion**: reorder-level monitoring
//! - **AuditEntry**: hash-chained compliance log
//!
//! Request payloads (`Create*`, `Update*`) derive `validator::Validate`.

pub mod alert;
pub mod audit;
pub mod batch;
pub mod pagination;
pub mod prescription;
pub mod product;
pub mod sale;
pub mod stock;
pub mod supplier;
pub mod tenant;
pub mod user;

#[cfg(test)]
pub mod property_tests;

pub use alert::*;
pub use audit::*;
pub use batch::*;
pub use pagination::*;
pub use prescription::*;
pub use product::*;
pub use sale::*;
pub use stock::*;
pub use supplier::*;
pub use tenant::*;
pub use user::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn test_new_tenant_starts_on_community() {
        let tenant = Tenant::new("Green Cross Pharmacy".to_string());
        assert_eq!(tenant.tier, SubscriptionTier::Community);
        assert!(tenant.is_active);
        assert_eq!(tenant.effective_tier(Utc::now()), SubscriptionTier::Community);
    }

    #[test]
    fn test_lapsed_subscription_falls_back_to_community() {
        let mut tenant = Tenant::new("Green Cross Pharmacy".to_string());
        tenant.tier = SubscriptionTier::Pro;
        tenant.subscription_expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(tenant.effective_tier(Utc::now()), SubscriptionTier::Community);

        tenant.subscription_expires_at = Some(Utc::now() + Duration::days(30));
        assert_eq!(tenant.effective_tier(Utc::now()), SubscriptionTier::Pro);
    }

    #[test]
    fn test_user_password_hash_never_serialized() {
        let user = User::new(
            Uuid::new_v4(),
            "Asha Rao".to_string(),
            "Asha@Example.com".to_string(),
            UserRole::Pharmacist,
            "sha256$1$00$00".to_string(),
        );
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "asha@example.com");
        assert_eq!(json["role"], "PHARMACIST");
    }

    #[test]
    fn test_role_counts_against_tier_limit() {
        assert_eq!(UserRole::Admin.limited_resource(), Some(LimitedResource::Admins));
        assert_eq!(UserRole::Pharmacist.limited_resource(), Some(LimitedResource::Pharmacists));
        assert_eq!(UserRole::User.limited_resource(), None);

        let err = SubscriptionTier::Community
            .check_limit(LimitedResource::Pharmacists, 1)
            .unwrap_err();
        assert_eq!(err.limit, 1);
    }
}
