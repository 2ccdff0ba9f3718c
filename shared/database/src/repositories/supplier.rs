//! Supplier Repository
//!
//! CRUD operations for supplier records.
//! Uses runtime SQL queries (unchecked) to avoid requiring DATABASE_URL at compile time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{PageRequest, Supplier, SupplierSummary};

use super::user::like_pattern;

const SUPPLIER_COLUMNS: &str =
    "id, tenant_id, name, email, phone, address, gst_number, contact_person, created_at, updated_at";

pub struct SupplierRepository {
    pool: PgPool,
}

impl SupplierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find supplier by ID
    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Supplier>> {
        let row: Option<SupplierRow> = sqlx::query_as(&format!(
            "SELECT {} FROM suppliers WHERE tenant_id = $1 AND id = $2",
            SUPPLIER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch supplier by ID")?;

        Ok(row.map(|r| r.into()))
    }

    /// Case-insensitive name match, optionally ignoring one supplier
    pub async fn find_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<Option<Supplier>> {
        let row: Option<SupplierRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM suppliers
            WHERE tenant_id = $1 AND LOWER(name) = LOWER($2)
              AND ($3::uuid IS NULL OR id <> $3)
            LIMIT 1
            "#,
            SUPPLIER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(name.trim())
        .bind(excluding)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch supplier by name")?;

        Ok(row.map(|r| r.into()))
    }

    /// Page of suppliers with how many batches each supplied
    pub async fn list(
        &self,
        tenant_id: Uuid,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<SupplierSummary>, i64)> {
        let pattern = search.map(like_pattern);

        let rows: Vec<SupplierSummaryRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.tenant_id, s.name, s.email, s.phone, s.address, s.gst_number,
                   s.contact_person, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM batches b WHERE b.supplier_id = s.id) AS batch_count
            FROM suppliers s
            WHERE s.tenant_id = $1
              AND ($2::text IS NULL OR s.name ILIKE $2 OR s.email ILIKE $2
                   OR s.phone ILIKE $2 OR s.contact_person ILIKE $2)
            ORDER BY s.name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(&pattern)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list suppliers")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM suppliers
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2
                   OR phone ILIKE $2 OR contact_person ILIKE $2)
            "#,
        )
        .bind(tenant_id)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count suppliers")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// Create new supplier
    pub async fn create(&self, supplier: &Supplier) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO suppliers (id, tenant_id, name, email, phone, address, gst_number,
                                   contact_person, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(supplier.id)
        .bind(supplier.tenant_id)
        .bind(&supplier.name)
        .bind(&supplier.email)
        .bind(&supplier.phone)
        .bind(&supplier.address)
        .bind(&supplier.gst_number)
        .bind(&supplier.contact_person)
        .bind(supplier.created_at)
        .bind(supplier.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert supplier")?;

        Ok(supplier.id)
    }

    /// Update existing supplier
    pub async fn update(&self, supplier: &Supplier) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE suppliers
            SET name = $3, email = $4, phone = $5, address = $6, gst_number = $7,
                contact_person = $8, updated_at = $9
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(supplier.tenant_id)
        .bind(supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.email)
        .bind(&supplier.phone)
        .bind(&supplier.address)
        .bind(&supplier.gst_number)
        .bind(&supplier.contact_person)
        .bind(supplier.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update supplier")?;

        Ok(())
    }

    pub async fn has_batches(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM batches WHERE tenant_id = $1 AND supplier_id = $2)",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check supplier batches")?;

        Ok(exists)
    }

    /// Delete supplier
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM suppliers WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete supplier")?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database row representation
#[derive(Debug, FromRow)]
struct SupplierRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    gst_number: Option<String>,
    contact_person: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SupplierRow> for Supplier {
    fn from(row: SupplierRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            gst_number: row.gst_number,
            contact_person: row.contact_person,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SupplierSummaryRow {
    #[sqlx(flatten)]
    supplier: SupplierRow,
    batch_count: i64,
}

impl From<SupplierSummaryRow> for SupplierSummary {
    fn from(row: SupplierSummaryRow) -> Self {
        Self {
            supplier: row.supplier.into(),
            batch_count: row.batch_count,
        }
    }
}
