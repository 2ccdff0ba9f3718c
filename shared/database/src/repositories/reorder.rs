//! Reorder suggestion persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{AlertPriority, ReorderSuggestion};

pub struct ReorderRepository {
    pool: PgPool,
}

impl ReorderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Swaps the tenant's unprocessed suggestions for `suggestions` atomically.
    /// Processed ones are kept as history.
    pub async fn replace_open(&self, tenant_id: Uuid, suggestions: &[ReorderSuggestion]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin suggestion refresh")?;

        sqlx::query("DELETE FROM reorder_suggestions WHERE tenant_id = $1 AND is_processed = FALSE")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear open suggestions")?;

        for suggestion in suggestions {
            sqlx::query(
                r#"
                INSERT INTO reorder_suggestions (id, tenant_id, product_id, current_stock,
                                                 reorder_level, suggested_quantity, priority,
                                                 reason, is_processed, created_at, processed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(suggestion.id)
            .bind(tenant_id)
            .bind(suggestion.product_id)
            .bind(suggestion.current_stock)
            .bind(suggestion.reorder_level)
            .bind(suggestion.suggested_quantity)
            .bind(suggestion.priority.as_str())
            .bind(&suggestion.reason)
            .bind(suggestion.is_processed)
            .bind(suggestion.created_at)
            .bind(suggestion.processed_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert reorder suggestion")?;
        }

        tx.commit().await.context("Failed to commit suggestion refresh")?;
        tracing::debug!(tenant_id = %tenant_id, count = suggestions.len(), "Reorder suggestions refreshed");
        Ok(())
    }

    /// Returns how many suggestions were closed.
    pub async fn mark_processed(&self, tenant_id: Uuid, product_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reorder_suggestions
            SET is_processed = TRUE, processed_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND is_processed = FALSE
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark suggestions processed")?;

        Ok(result.rows_affected())
    }

    pub async fn list_open(&self, tenant_id: Uuid) -> Result<Vec<ReorderSuggestion>> {
        let rows: Vec<SuggestionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, product_id, current_stock, reorder_level, suggested_quantity,
                   priority, reason, is_processed, created_at, processed_at
            FROM reorder_suggestions
            WHERE tenant_id = $1 AND is_processed = FALSE
            ORDER BY CASE priority WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END,
                     current_stock, created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list reorder suggestions")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[derive(Debug, FromRow)]
struct SuggestionRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    current_stock: i64,
    reorder_level: i32,
    suggested_quantity: i32,
    priority: String,
    reason: String,
    is_processed: bool,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<SuggestionRow> for ReorderSuggestion {
    fn from(row: SuggestionRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            product_id: row.product_id,
            current_stock: row.current_stock,
            reorder_level: row.reorder_level,
            suggested_quantity: row.suggested_quantity,
            priority: AlertPriority::from_str(&row.priority).unwrap_or(AlertPriority::Medium),
            reason: row.reason,
            is_processed: row.is_processed,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}
