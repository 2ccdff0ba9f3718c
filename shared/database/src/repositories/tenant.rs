//! Tenant Repository
//!
//! Tenants, subscription tier changes and the live usage counts tier limits
//! are checked against.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{SubscriptionTier, Tenant, TierUsage, UpdateTenant, User};

pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Signup: the tenant and its first administrator land together or not at all.
    pub async fn create_with_admin(&self, tenant: &Tenant, admin: &User) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin signup transaction")?;

        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, drug_license_number, phone, address, tier,
                                 is_active, subscription_expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.drug_license_number)
        .bind(&tenant.phone)
        .bind(&tenant.address)
        .bind(tenant.tier.as_str())
        .bind(tenant.is_active)
        .bind(tenant.subscription_expires_at)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert tenant")?;

        sqlx::query(
            r#"
            INSERT INTO users (id, tenant_id, name, email, phone_number, role, is_active,
                               password_hash, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(admin.id)
        .bind(admin.tenant_id)
        .bind(&admin.name)
        .bind(&admin.email)
        .bind(&admin.phone_number)
        .bind(admin.role.as_str())
        .bind(admin.is_active)
        .bind(&admin.password_hash)
        .bind(admin.last_login_at)
        .bind(admin.created_at)
        .bind(admin.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert tenant administrator")?;

        tx.commit().await.context("Failed to commit signup")?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            SELECT id, name, drug_license_number, phone, address, tier, is_active,
                   subscription_expires_at, created_at, updated_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tenant by ID")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn list_active(&self) -> Result<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(
            r#"
            SELECT id, name, drug_license_number, phone, address, tier, is_active,
                   subscription_expires_at, created_at, updated_at
            FROM tenants
            WHERE is_active = TRUE
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active tenants")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn update_details(&self, id: Uuid, update: &UpdateTenant) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            UPDATE tenants
            SET name = COALESCE($2, name),
                drug_license_number = COALESCE($3, drug_license_number),
                phone = COALESCE($4, phone),
                address = COALESCE($5, address),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, drug_license_number, phone, address, tier, is_active,
                      subscription_expires_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.drug_license_number)
        .bind(&update.phone)
        .bind(&update.address)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update tenant")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn update_tier(
        &self,
        id: Uuid,
        tier: SubscriptionTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            UPDATE tenants
            SET tier = $2, subscription_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, drug_license_number, phone, address, tier, is_active,
                      subscription_expires_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(tier.as_str())
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update subscription tier")?;

        Ok(row.map(|r| r.into()))
    }

    /// Counted live; invoices are sales created since the start of the UTC month.
    pub async fn usage(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<TierUsage> {
        let row: UsageRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users
                  WHERE tenant_id = $1 AND role = 'ADMIN' AND is_active = TRUE) AS admins,
                (SELECT COUNT(*) FROM users
                  WHERE tenant_id = $1 AND role = 'PHARMACIST' AND is_active = TRUE) AS pharmacists,
                (SELECT COUNT(*) FROM products WHERE tenant_id = $1) AS products,
                (SELECT COUNT(*) FROM sales
                  WHERE tenant_id = $1 AND created_at >= $2) AS invoices_this_month,
                (SELECT COUNT(*) FROM suppliers WHERE tenant_id = $1) AS suppliers
            "#,
        )
        .bind(tenant_id)
        .bind(month_start(now))
        .fetch_one(&self.pool)
        .await
        .context("Failed to count tenant usage")?;

        Ok(TierUsage {
            admins: row.admins,
            pharmacists: row.pharmacists,
            products: row.products,
            invoices_this_month: row.invoices_this_month,
            suppliers: row.suppliers,
        })
    }
}

/// First instant of the UTC month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    drug_license_number: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    tier: String,
    is_active: bool,
    subscription_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            drug_license_number: row.drug_license_number,
            phone: row.phone,
            address: row.address,
            tier: SubscriptionTier::from_str(&row.tier).unwrap_or(SubscriptionTier::Community),
            is_active: row.is_active,
            subscription_expires_at: row.subscription_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    admins: i64,
    pharmacists: i64,
    products: i64,
    invoices_this_month: i64,
    suppliers: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_start() {
        let now = Utc.with_ymd_and_hms(2024, 3, 17, 15, 42, 9).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    fn row(tier: &str) -> TenantRow {
        let now = Utc::now();
        TenantRow {
            id: Uuid::new_v4(),
            name: "Care Pharmacy".to_string(),
            drug_license_number: None,
            phone: None,
            address: None,
            tier: tier.to_string(),
            is_active: true,
            subscription_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stored_tier_parsing() {
        assert_eq!(Tenant::from(row("PRO")).tier, SubscriptionTier::Pro);
        assert_eq!(Tenant::from(row("gold")).tier, SubscriptionTier::Community);
    }
}
