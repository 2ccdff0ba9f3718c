//! Read-only aggregates for the dashboard and sales reports. Only completed
//! sales count towards revenue.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, FromRow)]
pub struct SalesAggregate {
    pub orders: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RecentPrescription {
    pub id: Uuid,
    pub patient_name: String,
    pub doctor_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, FromRow)]
pub struct PrescriptionCounts {
    pub total: i64,
    pub pending: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DailySales {
    pub date: NaiveDate,
    pub orders: i64,
    pub subtotal: f64,
    pub gst_amount: f64,
    pub discount: f64,
    pub revenue: f64,
}

pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Completed sales in `[from, to)`.
    pub async fn sales_between(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SalesAggregate> {
        let aggregate: SalesAggregate = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS orders, COALESCE(SUM(total_amount), 0)::DOUBLE PRECISION AS revenue
            FROM sales
            WHERE tenant_id = $1 AND status = 'COMPLETED' AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate sales")?;

        Ok(aggregate)
    }

    pub async fn top_products(&self, tenant_id: Uuid, since: DateTime<Utc>, limit: i64) -> Result<Vec<TopProduct>> {
        let rows: Vec<TopProduct> = sqlx::query_as(
            r#"
            SELECT p.id AS product_id, p.name,
                   SUM(si.quantity)::BIGINT AS quantity,
                   SUM(si.total_amount)::DOUBLE PRECISION AS revenue
            FROM sale_items si
            JOIN sales s ON s.id = si.sale_id
            JOIN products p ON p.id = si.product_id
            WHERE s.tenant_id = $1 AND s.status = 'COMPLETED' AND s.created_at >= $2
            GROUP BY p.id, p.name
            ORDER BY quantity DESC, p.name
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch top products")?;

        Ok(rows)
    }

    /// Latest prescriptions with the value of the completed sales made against them.
    pub async fn recent_prescriptions(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<RecentPrescription>> {
        let rows: Vec<RecentPrescription> = sqlx::query_as(
            r#"
            SELECT pr.id, pr.patient_name, pr.doctor_name, pr.status, pr.created_at,
                   COALESCE((SELECT SUM(s.total_amount) FROM sales s
                             WHERE s.prescription_id = pr.id AND s.status = 'COMPLETED'), 0)::DOUBLE PRECISION
                       AS amount
            FROM prescriptions pr
            WHERE pr.tenant_id = $1
            ORDER BY pr.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent prescriptions")?;

        Ok(rows)
    }

    pub async fn prescription_counts(&self, tenant_id: Uuid) -> Result<PrescriptionCounts> {
        let counts: PrescriptionCounts = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status IN ('UPLOADED', 'PENDING_VALIDATION')) AS pending
            FROM prescriptions
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count prescriptions")?;

        Ok(counts)
    }

    /// One row per day with completed sales, `from` and `to` inclusive.
    pub async fn daily_sales(&self, tenant_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailySales>> {
        let rows: Vec<DailySales> = sqlx::query_as(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS date,
                   COUNT(*) AS orders,
                   COALESCE(SUM(subtotal), 0)::DOUBLE PRECISION AS subtotal,
                   COALESCE(SUM(gst_amount), 0)::DOUBLE PRECISION AS gst_amount,
                   COALESCE(SUM(discount), 0)::DOUBLE PRECISION AS discount,
                   COALESCE(SUM(total_amount), 0)::DOUBLE PRECISION AS revenue
            FROM sales
            WHERE tenant_id = $1 AND status = 'COMPLETED'
              AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch daily sales")?;

        Ok(rows)
    }
}
