//! Stock movement ledger and inventory aggregates.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use pharmy_models::{MovementType, StockMovement};

const MOVEMENT_COLUMNS: &str = "m.id, m.tenant_id, m.product_id, m.batch_id, m.movement_type, m.quantity, \
                                m.reason, m.reference_id, m.user_id, m.created_at";

#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// A movement with the names needed to display it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MovementRecord {
    #[serde(flatten)]
    pub movement: StockMovement,
    pub product_name: String,
    pub batch_number: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StockTotals {
    pub total_units: i64,
    pub total_value: f64,
    pub units_out_last_7_days: i64,
}

pub struct StockRepository {
    pool: PgPool,
}

impl StockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest first, at most `limit` rows.
    pub async fn movements(
        &self,
        tenant_id: Uuid,
        filter: &MovementFilter,
        limit: i64,
    ) -> Result<Vec<MovementRecord>> {
        let rows: Vec<MovementRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, p.name AS product_name, b.batch_number
            FROM stock_movements m
            JOIN products p ON p.id = m.product_id
            JOIN batches b ON b.id = m.batch_id
            WHERE m.tenant_id = $1
              AND ($2::uuid IS NULL OR m.product_id = $2)
              AND ($3::uuid IS NULL OR m.batch_id = $3)
              AND ($4::text IS NULL OR m.movement_type = $4)
              AND ($5::timestamptz IS NULL OR m.created_at >= $5)
              AND ($6::timestamptz IS NULL OR m.created_at <= $6)
            ORDER BY m.created_at DESC
            LIMIT $7
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.batch_id)
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch stock movements")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn recent(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<MovementRecord>> {
        self.movements(tenant_id, &MovementFilter::default(), limit).await
    }

    pub async fn totals(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<StockTotals> {
        let row: TotalsRow = sqlx::query_as(
            r#"
            SELECT
                COALESCE((SELECT SUM(quantity) FROM batches
                          WHERE tenant_id = $1 AND quantity > 0), 0)::BIGINT AS total_units,
                COALESCE((SELECT SUM(quantity * cost_price) FROM batches
                          WHERE tenant_id = $1 AND quantity > 0), 0)::DOUBLE PRECISION AS total_value,
                COALESCE((SELECT SUM(-quantity) FROM stock_movements
                          WHERE tenant_id = $1 AND movement_type = 'OUT' AND created_at >= $2), 0)::BIGINT
                    AS units_out
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute stock totals")?;

        Ok(StockTotals {
            total_units: row.total_units,
            total_value: row.total_value,
            units_out_last_7_days: row.units_out,
        })
    }
}

/// Movements are written inside the caller's transaction.
pub(crate) async fn insert_movement(conn: &mut PgConnection, movement: &StockMovement) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, tenant_id, product_id, batch_id, movement_type, quantity,
                                     reason, reference_id, user_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(movement.id)
    .bind(movement.tenant_id)
    .bind(movement.product_id)
    .bind(movement.batch_id)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity)
    .bind(&movement.reason)
    .bind(movement.reference_id)
    .bind(movement.user_id)
    .bind(movement.created_at)
    .execute(conn)
    .await
    .context("Failed to record stock movement")?;

    Ok(())
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    batch_id: Uuid,
    movement_type: String,
    quantity: i32,
    reason: Option<String>,
    reference_id: Option<Uuid>,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    product_name: String,
    batch_number: String,
}

impl From<MovementRow> for MovementRecord {
    fn from(row: MovementRow) -> Self {
        Self {
            movement: StockMovement {
                id: row.id,
                tenant_id: row.tenant_id,
                product_id: row.product_id,
                batch_id: row.batch_id,
                movement_type: MovementType::from_str(&row.movement_type)
                    .unwrap_or(MovementType::Adjustment),
                quantity: row.quantity,
                reason: row.reason,
                reference_id: row.reference_id,
                user_id: row.user_id,
                created_at: row.created_at,
            },
            product_name: row.product_name,
            batch_number: row.batch_number,
        }
    }
}

#[derive(Debug, FromRow)]
struct TotalsRow {
    total_units: i64,
    total_value: f64,
    units_out: i64,
}
