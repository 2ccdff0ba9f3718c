//! Prescription Repository
//!
//! Prescriptions and their medicine lines. Item lists are always replaced as
//! a whole inside the same transaction as the prescription row.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use pharmy_models::{PageRequest, Prescription, PrescriptionDetail, PrescriptionItem, PrescriptionStatus};

use super::user::like_pattern;

const PRESCRIPTION_COLUMNS: &str = "id, tenant_id, patient_name, patient_phone, patient_age, doctor_name, \
                                    uploaded_by, validated_by, file_url, file_name, extracted_text, status, \
                                    notes, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct PrescriptionFilter {
    pub status: Option<PrescriptionStatus>,
    pub search: Option<String>,
    /// Restricts the list to one uploader.
    pub uploaded_by: Option<Uuid>,
}

pub struct PrescriptionRepository {
    pool: PgPool,
}

impl PrescriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, prescription: &Prescription, items: &[PrescriptionItem]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin prescription insert")?;

        sqlx::query(
            r#"
            INSERT INTO prescriptions (id, tenant_id, patient_name, patient_phone, patient_age,
                                       doctor_name, uploaded_by, validated_by, file_url, file_name,
                                       extracted_text, status, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(prescription.id)
        .bind(prescription.tenant_id)
        .bind(&prescription.patient_name)
        .bind(&prescription.patient_phone)
        .bind(prescription.patient_age)
        .bind(&prescription.doctor_name)
        .bind(prescription.uploaded_by)
        .bind(prescription.validated_by)
        .bind(&prescription.file_url)
        .bind(&prescription.file_name)
        .bind(&prescription.extracted_text)
        .bind(prescription.status.as_str())
        .bind(&prescription.notes)
        .bind(prescription.created_at)
        .bind(prescription.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert prescription")?;

        insert_items(&mut tx, items).await?;

        tx.commit().await.context("Failed to commit prescription insert")?;
        Ok(())
    }

    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Prescription>> {
        let row: Option<PrescriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prescriptions WHERE tenant_id = $1 AND id = $2",
            PRESCRIPTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch prescription by ID")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn find_detail(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<PrescriptionDetail>> {
        let Some(prescription) = self.find_by_id(tenant_id, id).await? else {
            return Ok(None);
        };
        let items = self.items(id).await?;
        Ok(Some(PrescriptionDetail { prescription, items }))
    }

    pub async fn items(&self, prescription_id: Uuid) -> Result<Vec<PrescriptionItem>> {
        let rows: Vec<PrescriptionItemRow> = sqlx::query_as(
            r#"
            SELECT id, prescription_id, product_id, medicine_name, dosage, quantity, instructions
            FROM prescription_items
            WHERE prescription_id = $1
            ORDER BY medicine_name
            "#,
        )
        .bind(prescription_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch prescription items")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Newest first. Search covers patient name, phone and doctor.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &PrescriptionFilter,
        page: PageRequest,
    ) -> Result<(Vec<Prescription>, i64)> {
        let status = filter.status.map(|s| s.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let rows: Vec<PrescriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM prescriptions
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR patient_name ILIKE $3 OR patient_phone ILIKE $3
                   OR doctor_name ILIKE $3)
              AND ($4::uuid IS NULL OR uploaded_by = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
            PRESCRIPTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(&search)
        .bind(filter.uploaded_by)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list prescriptions")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM prescriptions
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR patient_name ILIKE $3 OR patient_phone ILIKE $3
                   OR doctor_name ILIKE $3)
              AND ($4::uuid IS NULL OR uploaded_by = $4)
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .bind(&search)
        .bind(filter.uploaded_by)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count prescriptions")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// Writes every mutable column back, provided the stored status is still
    /// `expected`. Returns `false` without touching anything when another
    /// request moved the prescription first. `items` replaces the lines when given.
    pub async fn update(
        &self,
        prescription: &Prescription,
        expected: PrescriptionStatus,
        items: Option<&[PrescriptionItem]>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin prescription update")?;

        let updated = sqlx::query(
            r#"
            UPDATE prescriptions
            SET patient_name = $3, patient_phone = $4, patient_age = $5, doctor_name = $6,
                validated_by = $7, file_url = $8, file_name = $9, extracted_text = $10,
                status = $11, notes = $12, updated_at = $13
            WHERE tenant_id = $1 AND id = $2 AND status = $14
            "#,
        )
        .bind(prescription.tenant_id)
        .bind(prescription.id)
        .bind(&prescription.patient_name)
        .bind(&prescription.patient_phone)
        .bind(prescription.patient_age)
        .bind(&prescription.doctor_name)
        .bind(prescription.validated_by)
        .bind(&prescription.file_url)
        .bind(&prescription.file_name)
        .bind(&prescription.extracted_text)
        .bind(prescription.status.as_str())
        .bind(&prescription.notes)
        .bind(prescription.updated_at)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to update prescription")?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(items) = items {
            sqlx::query("DELETE FROM prescription_items WHERE prescription_id = $1")
                .bind(prescription.id)
                .execute(&mut *tx)
                .await
                .context("Failed to clear prescription items")?;
            insert_items(&mut tx, items).await?;
        }

        tx.commit().await.context("Failed to commit prescription update")?;
        Ok(true)
    }

    pub async fn referenced_by_sales(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM sales WHERE tenant_id = $1 AND prescription_id = $2)",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check prescription sales")?;

        Ok(referenced)
    }

    /// Items cascade with the prescription.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM prescriptions WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete prescription")?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_items(conn: &mut PgConnection, items: &[PrescriptionItem]) -> Result<()> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO prescription_items (id, prescription_id, product_id, medicine_name,
                                            dosage, quantity, instructions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id)
        .bind(item.prescription_id)
        .bind(item.product_id)
        .bind(&item.medicine_name)
        .bind(&item.dosage)
        .bind(item.quantity)
        .bind(&item.instructions)
        .execute(&mut *conn)
        .await
        .context("Failed to insert prescription item")?;
    }
    Ok(())
}

#[derive(Debug, FromRow)]
struct PrescriptionRow {
    id: Uuid,
    tenant_id: Uuid,
    patient_name: String,
    patient_phone: Option<String>,
    patient_age: Option<i32>,
    doctor_name: Option<String>,
    uploaded_by: Uuid,
    validated_by: Option<Uuid>,
    file_url: Option<String>,
    file_name: Option<String>,
    extracted_text: Option<String>,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PrescriptionRow> for Prescription {
    fn from(row: PrescriptionRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            patient_name: row.patient_name,
            patient_phone: row.patient_phone,
            patient_age: row.patient_age,
            doctor_name: row.doctor_name,
            uploaded_by: row.uploaded_by,
            validated_by: row.validated_by,
            file_url: row.file_url,
            file_name: row.file_name,
            extracted_text: row.extracted_text,
            status: PrescriptionStatus::from_str(&row.status).unwrap_or(PrescriptionStatus::Uploaded),
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PrescriptionItemRow {
    id: Uuid,
    prescription_id: Uuid,
    product_id: Option<Uuid>,
    medicine_name: String,
    dosage: Option<String>,
    quantity: Option<i32>,
    instructions: Option<String>,
}

impl From<PrescriptionItemRow> for PrescriptionItem {
    fn from(row: PrescriptionItemRow) -> Self {
        Self {
            id: row.id,
            prescription_id: row.prescription_id,
            product_id: row.product_id,
            medicine_name: row.medicine_name,
            dosage: row.dosage,
            quantity: row.quantity,
            instructions: row.instructions,
        }
    }
}
