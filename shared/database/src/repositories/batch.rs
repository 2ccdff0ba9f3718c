//! Batch Repository
//!
//! Stock receipts. Every quantity change writes a stock movement in the same
//! transaction as the batch update.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{
    Batch, MovementType, PageRequest, StockAdjustment, StockError, StockMovement, UpdateBatch,
};

use super::stock::insert_movement;

const BATCH_COLUMNS: &str = "b.id, b.tenant_id, b.product_id, b.supplier_id, b.batch_number, b.mfg_date, \
                             b.expiry_date, b.quantity, b.cost_price, b.selling_price, b.created_at, b.updated_at";

#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub product_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    /// Inclusive expiry window.
    pub expiring_by: Option<(NaiveDate, NaiveDate)>,
    pub max_quantity: Option<i32>,
}

/// A batch joined with its product and supplier names.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchListing {
    pub batch: Batch,
    pub product_name: String,
    pub sku: String,
    pub supplier_name: String,
    pub reorder_level: i32,
}

pub struct BatchRepository {
    pool: PgPool,
}

impl BatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the batch with its `IN` movement.
    pub async fn create(&self, batch: &Batch, user_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin batch insert")?;

        sqlx::query(
            r#"
            INSERT INTO batches (id, tenant_id, product_id, supplier_id, batch_number, mfg_date,
                                 expiry_date, quantity, cost_price, selling_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(batch.id)
        .bind(batch.tenant_id)
        .bind(batch.product_id)
        .bind(batch.supplier_id)
        .bind(&batch.batch_number)
        .bind(batch.mfg_date)
        .bind(batch.expiry_date)
        .bind(batch.quantity)
        .bind(batch.cost_price)
        .bind(batch.selling_price)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert batch")?;

        let movement = StockMovement::new(
            batch.tenant_id,
            batch.product_id,
            batch.id,
            MovementType::In,
            batch.quantity,
        )
        .with_reason(format!("Batch {} received", batch.batch_number))
        .by_user(user_id);
        insert_movement(&mut tx, &movement).await?;

        tx.commit().await.context("Failed to commit batch insert")?;
        Ok(())
    }

    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<BatchListing>> {
        let row: Option<BatchListingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, p.name AS product_name, p.sku, s.name AS supplier_name, p.reorder_level
            FROM batches b
            JOIN products p ON p.id = b.product_id
            JOIN suppliers s ON s.id = b.supplier_id
            WHERE b.tenant_id = $1 AND b.id = $2
            "#,
            BATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch batch by ID")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn number_taken(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        batch_number: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM batches
                WHERE tenant_id = $1 AND product_id = $2 AND batch_number = $3
                  AND ($4::uuid IS NULL OR id <> $4)
            )
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(batch_number.trim())
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check batch number")?;

        Ok(taken)
    }

    /// Applies `changes` to the locked row. Fields the request left out keep
    /// their stored values, so a concurrent sale is never overwritten. `None`
    /// if the batch does not exist for the tenant.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        changes: &UpdateBatch,
        today: NaiveDate,
        user_id: Uuid,
    ) -> Result<Option<Batch>> {
        let mut tx = self.pool.begin().await.context("Failed to begin batch update")?;

        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, product_id, supplier_id, batch_number, mfg_date, expiry_date,
                   quantity, cost_price, selling_price, created_at, updated_at
            FROM batches
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock batch")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut batch: Batch = row.into();
        let previous = batch.quantity;
        changes.apply_to(&mut batch, today)?;

        let row: BatchRow = sqlx::query_as(
            r#"
            UPDATE batches
            SET batch_number = $3, supplier_id = $4, mfg_date = $5, expiry_date = $6,
                quantity = $7, cost_price = $8, selling_price = $9, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING id, tenant_id, product_id, supplier_id, batch_number, mfg_date, expiry_date,
                      quantity, cost_price, selling_price, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(&batch.batch_number)
        .bind(batch.supplier_id)
        .bind(batch.mfg_date)
        .bind(batch.expiry_date)
        .bind(batch.quantity)
        .bind(batch.cost_price)
        .bind(batch.selling_price)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to update batch")?;

        if changes.quantity.is_some() && batch.quantity != previous {
            let movement = StockMovement::new(
                tenant_id,
                batch.product_id,
                batch.id,
                MovementType::Adjustment,
                batch.quantity - previous,
            )
            .with_reason(format!("Batch quantity changed from {} to {}", previous, batch.quantity))
            .by_user(user_id);
            insert_movement(&mut tx, &movement).await?;
        }

        tx.commit().await.context("Failed to commit batch update")?;
        Ok(Some(row.into()))
    }

    /// Applies a signed correction under a row lock.
    pub async fn adjust(
        &self,
        tenant_id: Uuid,
        adjustment: &StockAdjustment,
        user_id: Uuid,
    ) -> Result<Option<(Batch, StockMovement)>> {
        let mut tx = self.pool.begin().await.context("Failed to begin stock adjustment")?;

        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, product_id, supplier_id, batch_number, mfg_date, expiry_date,
                   quantity, cost_price, selling_price, created_at, updated_at
            FROM batches
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(adjustment.batch_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock batch for adjustment")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut batch: Batch = row.into();

        let resulting = i64::from(batch.quantity) + i64::from(adjustment.quantity_change);
        if resulting < 0 {
            return Err(StockError::NegativeQuantity {
                batch_number: batch.batch_number,
                resulting,
            }
            .into());
        }

        batch.quantity = i32::try_from(resulting).context("Adjusted quantity out of range")?;
        sqlx::query("UPDATE batches SET quantity = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(batch.id)
            .bind(batch.quantity)
            .execute(&mut *tx)
            .await
            .context("Failed to apply stock adjustment")?;

        let movement = StockMovement::new(
            tenant_id,
            batch.product_id,
            batch.id,
            MovementType::Adjustment,
            adjustment.quantity_change,
        )
        .with_reason(adjustment.reason.trim())
        .by_user(user_id);
        insert_movement(&mut tx, &movement).await?;

        tx.commit().await.context("Failed to commit stock adjustment")?;
        Ok(Some((batch, movement)))
    }

    pub async fn has_sales(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let sold: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sale_items si JOIN sales s ON s.id = si.sale_id
                WHERE s.tenant_id = $1 AND si.batch_id = $2
            )
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check batch sales")?;

        Ok(sold)
    }

    /// Movements cascade with the batch.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM batches WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete batch")?;

        Ok(result.rows_affected() > 0)
    }

    /// Ordered by expiry, soonest first.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &BatchFilter,
        page: PageRequest,
    ) -> Result<(Vec<BatchListing>, i64)> {
        let (expiring_from, expiring_to) = filter.expiring_by.unzip();

        let rows: Vec<BatchListingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, p.name AS product_name, p.sku, s.name AS supplier_name, p.reorder_level
            FROM batches b
            JOIN products p ON p.id = b.product_id
            JOIN suppliers s ON s.id = b.supplier_id
            WHERE b.tenant_id = $1
              AND ($2::uuid IS NULL OR b.product_id = $2)
              AND ($3::uuid IS NULL OR b.supplier_id = $3)
              AND ($4::date IS NULL OR b.expiry_date >= $4)
              AND ($5::date IS NULL OR b.expiry_date <= $5)
              AND ($6::int IS NULL OR b.quantity <= $6)
            ORDER BY b.expiry_date, b.id
            LIMIT $7 OFFSET $8
            "#,
            BATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.supplier_id)
        .bind(expiring_from)
        .bind(expiring_to)
        .bind(filter.max_quantity)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list batches")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM batches b
            WHERE b.tenant_id = $1
              AND ($2::uuid IS NULL OR b.product_id = $2)
              AND ($3::uuid IS NULL OR b.supplier_id = $3)
              AND ($4::date IS NULL OR b.expiry_date >= $4)
              AND ($5::date IS NULL OR b.expiry_date <= $5)
              AND ($6::int IS NULL OR b.quantity <= $6)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.supplier_id)
        .bind(expiring_from)
        .bind(expiring_to)
        .bind(filter.max_quantity)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count batches")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// All batches of the given products, soonest expiry first.
    pub async fn list_for_products(&self, tenant_id: Uuid, product_ids: &[Uuid]) -> Result<Vec<Batch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, product_id, supplier_id, batch_number, mfg_date, expiry_date,
                   quantity, cost_price, selling_price, created_at, updated_at
            FROM batches
            WHERE tenant_id = $1 AND product_id = ANY($2)
            ORDER BY expiry_date, id
            "#,
        )
        .bind(tenant_id)
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch product batches")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// In-stock batches expiring between `today` and `until`, soonest first.
    pub async fn expiring(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
        until: NaiveDate,
        limit: Option<i64>,
    ) -> Result<Vec<BatchListing>> {
        let rows: Vec<BatchListingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, p.name AS product_name, p.sku, s.name AS supplier_name, p.reorder_level
            FROM batches b
            JOIN products p ON p.id = b.product_id
            JOIN suppliers s ON s.id = b.supplier_id
            WHERE b.tenant_id = $1 AND b.quantity > 0
              AND b.expiry_date >= $2 AND b.expiry_date <= $3
            ORDER BY b.expiry_date, b.id
            LIMIT $4
            "#,
            BATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(today)
        .bind(until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expiring batches")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct BatchRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    supplier_id: Uuid,
    batch_number: String,
    mfg_date: NaiveDate,
    expiry_date: NaiveDate,
    quantity: i32,
    cost_price: f64,
    selling_price: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            product_id: row.product_id,
            supplier_id: row.supplier_id,
            batch_number: row.batch_number,
            mfg_date: row.mfg_date,
            expiry_date: row.expiry_date,
            quantity: row.quantity,
            cost_price: row.cost_price,
            selling_price: row.selling_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchListingRow {
    #[sqlx(flatten)]
    batch: BatchRow,
    product_name: String,
    sku: String,
    supplier_name: String,
    reorder_level: i32,
}

impl From<BatchListingRow> for BatchListing {
    fn from(row: BatchListingRow) -> Self {
        Self {
            batch: row.batch.into(),
            product_name: row.product_name,
            sku: row.sku,
            supplier_name: row.supplier_name,
            reorder_level: row.reorder_level,
        }
    }
}
