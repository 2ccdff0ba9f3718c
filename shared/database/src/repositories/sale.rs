//! Sale Repository
//!
//! Sales are written in one transaction: batch rows are locked, quantities are
//! re-checked and allocated first-expiry-first-out, and the sale, its items,
//! the batch decrements and the `OUT` movements commit together.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{
    allocate_fefo, compute_totals, format_sale_number, Batch, BatchStock, LineAmounts, MovementType,
    PageRequest, PaymentMethod, Sale, SaleDetail, SaleDraft, SaleItem, SaleStatus, StockError,
    StockMovement,
};

use super::batch::BatchRow;
use super::stock::insert_movement;
use super::user::like_pattern;

const SALE_COLUMNS: &str = "id, tenant_id, sale_number, customer_name, customer_phone, prescription_id, \
                            sold_by, subtotal, gst_amount, discount, total_amount, payment_method, status, \
                            created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct SaleFilter {
    pub status: Option<SaleStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

pub struct SaleRepository {
    pool: PgPool,
}

impl SaleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, draft: &SaleDraft, today: NaiveDate) -> Result<SaleDetail> {
        let mut tx = self.pool.begin().await.context("Failed to begin sale")?;
        let now = Utc::now();
        let sale_id = Uuid::new_v4();

        let mut items = Vec::new();
        let mut amounts = Vec::new();

        for line in &draft.lines {
            let rows: Vec<BatchRow> = sqlx::query_as(
                r#"
                SELECT id, tenant_id, product_id, supplier_id, batch_number, mfg_date, expiry_date,
                       quantity, cost_price, selling_price, created_at, updated_at
                FROM batches
                WHERE tenant_id = $1 AND product_id = $2 AND ($3::uuid IS NULL OR id = $3)
                ORDER BY expiry_date, id
                FOR UPDATE
                "#,
            )
            .bind(draft.tenant_id)
            .bind(line.product_id)
            .bind(line.batch_id)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to lock product batches")?;

            let batches: Vec<Batch> = rows.into_iter().map(Batch::from).collect();

            if let Some(batch_id) = line.batch_id {
                let usable = batches.first().is_some_and(|b| !b.is_expired(today));
                if !usable {
                    return Err(StockError::BatchUnavailable {
                        batch: batch_id.to_string(),
                        product: line.product_name.clone(),
                    }
                    .into());
                }
            }

            let stock: Vec<BatchStock> = batches.iter().map(BatchStock::from).collect();
            let allocations = allocate_fefo(&stock, line.quantity, today).map_err(|short| {
                StockError::Insufficient {
                    product: line.product_name.clone(),
                    requested: short.requested,
                    available: short.available,
                }
            })?;

            for allocation in allocations {
                sqlx::query(
                    r#"
                    UPDATE batches SET quantity = quantity - $3, updated_at = NOW()
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(draft.tenant_id)
                .bind(allocation.batch_id)
                .bind(allocation.quantity)
                .execute(&mut *tx)
                .await
                .context("Failed to decrement batch")?;

                let unit_price = line.price_for(allocation.selling_price);
                let line_amounts = LineAmounts::compute(unit_price, allocation.quantity, line.gst_rate);
                amounts.push(line_amounts);
                items.push(SaleItem {
                    id: Uuid::new_v4(),
                    sale_id,
                    product_id: line.product_id,
                    batch_id: allocation.batch_id,
                    quantity: allocation.quantity,
                    unit_price,
                    gst_rate: line.gst_rate,
                    gst_amount: line_amounts.gst_amount,
                    total_amount: line_amounts.total_amount,
                });
            }
        }

        let totals = compute_totals(&amounts, draft.discount)?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sale_counters (tenant_id, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, year)
            DO UPDATE SET last_value = sale_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(draft.tenant_id)
        .bind(now.year())
        .fetch_one(&mut *tx)
        .await
        .context("Failed to allocate sale number")?;

        let sale = Sale {
            id: sale_id,
            tenant_id: draft.tenant_id,
            sale_number: format_sale_number(now.year(), sequence),
            customer_name: draft.customer_name.clone(),
            customer_phone: draft.customer_phone.clone(),
            prescription_id: draft.prescription_id,
            sold_by: draft.sold_by,
            subtotal: totals.subtotal,
            gst_amount: totals.gst_amount,
            discount: totals.discount,
            total_amount: totals.total_amount,
            payment_method: draft.payment_method,
            status: SaleStatus::Completed,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sales (id, tenant_id, sale_number, customer_name, customer_phone,
                               prescription_id, sold_by, subtotal, gst_amount, discount,
                               total_amount, payment_method, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(sale.id)
        .bind(sale.tenant_id)
        .bind(&sale.sale_number)
        .bind(&sale.customer_name)
        .bind(&sale.customer_phone)
        .bind(sale.prescription_id)
        .bind(sale.sold_by)
        .bind(sale.subtotal)
        .bind(sale.gst_amount)
        .bind(sale.discount)
        .bind(sale.total_amount)
        .bind(sale.payment_method.as_str())
        .bind(sale.status.as_str())
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert sale")?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO sale_items (id, sale_id, product_id, batch_id, quantity, unit_price,
                                        gst_rate, gst_amount, total_amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(item.sale_id)
            .bind(item.product_id)
            .bind(item.batch_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.gst_rate)
            .bind(item.gst_amount)
            .bind(item.total_amount)
            .execute(&mut *tx)
            .await
            .context("Failed to insert sale item")?;

            let movement = StockMovement::new(
                sale.tenant_id,
                item.product_id,
                item.batch_id,
                MovementType::Out,
                -item.quantity,
            )
            .with_reason(format!("Sale {}", sale.sale_number))
            .with_reference(sale.id)
            .by_user(sale.sold_by);
            insert_movement(&mut tx, &movement).await?;
        }

        tx.commit().await.context("Failed to commit sale")?;

        tracing::info!(
            tenant_id = %sale.tenant_id,
            sale_number = %sale.sale_number,
            total = sale.total_amount,
            items = items.len(),
            "Sale completed"
        );

        Ok(SaleDetail { sale, items })
    }

    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Sale>> {
        let row: Option<SaleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sales WHERE tenant_id = $1 AND id = $2",
            SALE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch sale by ID")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn find_detail(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<SaleDetail>> {
        let Some(sale) = self.find_by_id(tenant_id, id).await? else {
            return Ok(None);
        };
        let items = self.items(id).await?;
        Ok(Some(SaleDetail { sale, items }))
    }

    pub async fn items(&self, sale_id: Uuid) -> Result<Vec<SaleItem>> {
        let rows: Vec<SaleItemRow> = sqlx::query_as(
            r#"
            SELECT id, sale_id, product_id, batch_id, quantity, unit_price, gst_rate,
                   gst_amount, total_amount
            FROM sale_items
            WHERE sale_id = $1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch sale items")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Newest first. `to` is inclusive.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<(Vec<Sale>, i64)> {
        let status = filter.status.map(|s| s.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let rows: Vec<SaleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM sales
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
              AND ($5::text IS NULL OR sale_number ILIKE $5 OR customer_name ILIKE $5
                   OR customer_phone ILIKE $5)
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
            SALE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(&search)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sales")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sales
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
              AND ($5::text IS NULL OR sale_number ILIKE $5 OR customer_name ILIKE $5
                   OR customer_phone ILIKE $5)
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(&search)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count sales")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// Cancels a completed sale and puts its stock back. `None` when the sale
    /// is missing or no longer completed.
    pub async fn cancel(&self, tenant_id: Uuid, id: Uuid, user_id: Uuid) -> Result<Option<SaleDetail>> {
        let mut tx = self.pool.begin().await.context("Failed to begin sale cancellation")?;

        let row: Option<SaleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE sales SET status = 'CANCELLED', updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND status = 'COMPLETED'
            RETURNING {}
            "#,
            SALE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to cancel sale")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sale: Sale = row.into();

        let item_rows: Vec<SaleItemRow> = sqlx::query_as(
            r#"
            SELECT id, sale_id, product_id, batch_id, quantity, unit_price, gst_rate,
                   gst_amount, total_amount
            FROM sale_items
            WHERE sale_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch sale items")?;
        let items: Vec<SaleItem> = item_rows.into_iter().map(|r| r.into()).collect();

        for item in &items {
            sqlx::query(
                r#"
                UPDATE batches SET quantity = quantity + $3, updated_at = NOW()
                WHERE tenant_id = $1 AND id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(item.batch_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await
            .context("Failed to restore batch quantity")?;

            let movement = StockMovement::new(
                tenant_id,
                item.product_id,
                item.batch_id,
                MovementType::Return,
                item.quantity,
            )
            .with_reason(format!("Sale {} cancelled", sale.sale_number))
            .with_reference(sale.id)
            .by_user(user_id);
            insert_movement(&mut tx, &movement).await?;
        }

        tx.commit().await.context("Failed to commit sale cancellation")?;
        Ok(Some(SaleDetail { sale, items }))
    }
}

#[derive(Debug, FromRow)]
struct SaleRow {
    id: Uuid,
    tenant_id: Uuid,
    sale_number: String,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    prescription_id: Option<Uuid>,
    sold_by: Uuid,
    subtotal: f64,
    gst_amount: f64,
    discount: f64,
    total_amount: f64,
    payment_method: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SaleRow> for Sale {
    fn from(row: SaleRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            sale_number: row.sale_number,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            prescription_id: row.prescription_id,
            sold_by: row.sold_by,
            subtotal: row.subtotal,
            gst_amount: row.gst_amount,
            discount: row.discount,
            total_amount: row.total_amount,
            payment_method: PaymentMethod::from_str(&row.payment_method).unwrap_or(PaymentMethod::Cash),
            status: SaleStatus::from_str(&row.status).unwrap_or(SaleStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SaleItemRow {
    id: Uuid,
    sale_id: Uuid,
    product_id: Uuid,
    batch_id: Uuid,
    quantity: i32,
    unit_price: f64,
    gst_rate: f64,
    gst_amount: f64,
    total_amount: f64,
}

impl From<SaleItemRow> for SaleItem {
    fn from(row: SaleItemRow) -> Self {
        Self {
            id: row.id,
            sale_id: row.sale_id,
            product_id: row.product_id,
            batch_id: row.batch_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            gst_rate: row.gst_rate,
            gst_amount: row.gst_amount,
            total_amount: row.total_amount,
        }
    }
}
