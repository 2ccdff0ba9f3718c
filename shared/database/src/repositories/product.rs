//! Product Repository
//!
//! Product catalogue CRUD plus the per-product stock snapshots that alerting
//! and the inventory summary are computed from.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{Product, ProductCategory, StockSnapshot};

use super::user::like_pattern;

const PRODUCT_COLUMNS: &str = "id, tenant_id, sku, name, description, category, unit, hsn_code, \
                               gst_rate, price, reorder_level, requires_prescription, \
                               created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<ProductCategory>,
    pub search: Option<String>,
}

pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, sku, name, description, category, unit, hsn_code,
                                  gst_rate, price, reorder_level, requires_prescription,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(product.id)
        .bind(product.tenant_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.category.as_str())
        .bind(&product.unit)
        .bind(&product.hsn_code)
        .bind(product.gst_rate)
        .bind(product.price)
        .bind(product.reorder_level)
        .bind(product.requires_prescription)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert product")?;

        Ok(())
    }

    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE tenant_id = $1 AND id = $2",
            PRODUCT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch product by ID")?;

        Ok(row.map(|r| r.into()))
    }

    /// SKUs double as barcodes.
    pub async fn find_by_sku(&self, tenant_id: Uuid, sku: &str) -> Result<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE tenant_id = $1 AND sku = $2",
            PRODUCT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(sku.trim())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch product by SKU")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn find_many(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE tenant_id = $1 AND id = ANY($2)",
            PRODUCT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch products")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn update(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET sku = $3, name = $4, description = $5, category = $6, unit = $7, hsn_code = $8,
                gst_rate = $9, price = $10, reorder_level = $11, requires_prescription = $12,
                updated_at = $13
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(product.tenant_id)
        .bind(product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.category.as_str())
        .bind(&product.unit)
        .bind(&product.hsn_code)
        .bind(product.gst_rate)
        .bind(product.price)
        .bind(product.reorder_level)
        .bind(product.requires_prescription)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update product")?;

        Ok(())
    }

    /// True when a sale or prescription line refers to the product.
    pub async fn has_history(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let referenced: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sale_items si JOIN sales s ON s.id = si.sale_id
                WHERE s.tenant_id = $1 AND si.product_id = $2
            ) OR EXISTS (
                SELECT 1 FROM prescription_items pi JOIN prescriptions p ON p.id = pi.prescription_id
                WHERE p.tenant_id = $1 AND pi.product_id = $2
            )
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check product history")?;

        Ok(referenced)
    }

    /// Removes the product and its batches. Movements and suggestions cascade.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin product delete")?;

        sqlx::query("DELETE FROM stock_movements WHERE tenant_id = $1 AND product_id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete product movements")?;

        sqlx::query("DELETE FROM batches WHERE tenant_id = $1 AND product_id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete product batches")?;

        let result = sqlx::query("DELETE FROM products WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete product")?;

        tx.commit().await.context("Failed to commit product delete")?;
        Ok(result.rows_affected() > 0)
    }

    /// Every matching product ordered by name. Stock filters run on the caller's side.
    pub async fn list(&self, tenant_id: Uuid, filter: &ProductFilter) -> Result<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM products
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR category = $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR sku ILIKE $3 OR description ILIKE $3)
            ORDER BY name
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.category.map(|c| c.as_str()))
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list products")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn search(
        &self,
        tenant_id: Uuid,
        query: &str,
        category: Option<ProductCategory>,
        limit: i64,
    ) -> Result<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM products
            WHERE tenant_id = $1
              AND (name ILIKE $2 OR sku ILIKE $2 OR description ILIKE $2)
              AND ($3::text IS NULL OR category = $3)
            ORDER BY name
            LIMIT $4
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(like_pattern(query))
        .bind(category.map(|c| c.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to search products")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn count(&self, tenant_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count products")?;
        Ok(count)
    }

    /// Stock figures per product from batches with units left. The expiring
    /// figure counts every unit expiring by the end of the warning window,
    /// including units already past their date and not yet written off.
    pub async fn stock_snapshots(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
        warning_days: i64,
    ) -> Result<Vec<StockSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.name, p.sku, p.category, p.unit, p.reorder_level,
                   COALESCE(SUM(b.quantity) FILTER (WHERE b.quantity > 0), 0)::BIGINT
                       AS current_stock,
                   COALESCE(SUM(b.quantity) FILTER (
                       WHERE b.quantity > 0 AND b.expiry_date <= $2), 0)::BIGINT
                       AS expiring_soon_stock
            FROM products p
            LEFT JOIN batches b ON b.product_id = p.id AND b.tenant_id = p.tenant_id
            WHERE p.tenant_id = $1
            GROUP BY p.id, p.name, p.sku, p.category, p.unit, p.reorder_level
            "#,
        )
        .bind(tenant_id)
        .bind(today + Duration::days(warning_days))
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute stock snapshots")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    tenant_id: Uuid,
    sku: String,
    name: String,
    description: Option<String>,
    category: String,
    unit: String,
    hsn_code: Option<String>,
    gst_rate: f64,
    price: f64,
    reorder_level: i32,
    requires_prescription: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            sku: row.sku,
            name: row.name,
            description: row.description,
            category: ProductCategory::from_str(&row.category).unwrap_or(ProductCategory::Otc),
            unit: row.unit,
            hsn_code: row.hsn_code,
            gst_rate: row.gst_rate,
            price: row.price,
            reorder_level: row.reorder_level,
            requires_prescription: row.requires_prescription,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: Uuid,
    name: String,
    sku: String,
    category: String,
    unit: String,
    reorder_level: i32,
    current_stock: i64,
    expiring_soon_stock: i64,
}

impl From<SnapshotRow> for StockSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            product_id: row.id,
            product_name: row.name,
            sku: row.sku,
            category: ProductCategory::from_str(&row.category).unwrap_or(ProductCategory::Otc),
            unit: row.unit,
            reorder_level: row.reorder_level,
            current_stock: row.current_stock,
            expiring_soon_stock: row.expiring_soon_stock,
        }
    }
}
