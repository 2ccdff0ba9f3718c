//! Audit Repository
//!
//! Immutable audit trail with hash chain verification. Chains are per tenant
//! and ordered by insertion sequence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{verify_chain, AuditAction, AuditEntry, ChainVerification, PageRequest};

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seals `entry` after the tenant's latest hash and stores it (no update/delete).
    pub async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        let mut tx = self.pool.begin().await.context("Failed to begin audit append")?;

        // Serialises appends per tenant so two writers cannot fork the chain.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(entry.tenant_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to lock audit chain")?;

        let previous_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM audit_entries WHERE tenant_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(entry.tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read audit chain head")?;

        let entry = entry.chained_after(previous_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_entries (id, tenant_id, timestamp, action, entity_type, entity_id,
                                       user_id, details, hash, previous_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.timestamp)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.user_id)
        .bind(&entry.details)
        .bind(&entry.hash)
        .bind(&entry.previous_hash)
        .execute(&mut *tx)
        .await
        .context("Failed to create audit entry")?;

        tx.commit().await.context("Failed to commit audit entry")?;
        Ok(entry)
    }

    /// Newest first.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<(Vec<AuditEntry>, i64)> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, timestamp, action, entity_type, entity_id, user_id,
                   details, hash, previous_hash
            FROM audit_entries
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR entity_id = $3)
            ORDER BY seq DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(tenant_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch audit entries")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM audit_entries
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR entity_id = $3)
            "#,
        )
        .bind(tenant_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count audit entries")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// Verify hash chain integrity for one tenant
    pub async fn verify(&self, tenant_id: Uuid) -> Result<ChainVerification> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, timestamp, action, entity_type, entity_id, user_id,
                   details, hash, previous_hash
            FROM audit_entries
            WHERE tenant_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch audit entries for verification")?;

        let entries: Vec<AuditEntry> = rows.into_iter().map(|r| r.into()).collect();
        let verification = verify_chain(&entries);
        if !verification.is_valid {
            tracing::warn!(
                tenant_id = %tenant_id,
                broken = verification.broken_links.len(),
                "Audit chain verification failed"
            );
        }
        Ok(verification)
    }
}

#[derive(Debug, Clone, FromRow)]
struct AuditRow {
    id: Uuid,
    tenant_id: Uuid,
    timestamp: DateTime<Utc>,
    action: String,
    entity_type: String,
    entity_id: Uuid,
    user_id: Option<Uuid>,
    details: serde_json::Value,
    hash: String,
    previous_hash: Option<String>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            timestamp: row.timestamp,
            // An unknown action cannot reproduce its hash, so verification flags it.
            action: AuditAction::from_str(&row.action).unwrap_or(AuditAction::StockAdjusted),
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            user_id: row.user_id,
            details: row.details,
            hash: row.hash,
            previous_hash: row.previous_hash,
        }
    }
}
