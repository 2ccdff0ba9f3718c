//! Low-stock digest contents
//!
//! Collects what one tenant's administrators are told about in a single
//! notification run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use pharmy_database::BatchListing;
use pharmy_models::{AlertSummary, LowStockAlert, Tenant};

/// Per-section cap so a large catalogue still yields a readable mail.
pub const MAX_DIGEST_ROWS: usize = 25;

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub tenant_name: String,
    pub generated_at: String,
    pub warning_days: i64,
    pub summary: AlertSummary,
    pub alerts: Vec<AlertRow>,
    pub expiring: Vec<ExpiringRow>,
    pub expiring_count: usize,
    pub expiring_units: i64,
    pub more_alerts: usize,
    pub more_expiring: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub product_name: String,
    pub sku: String,
    pub current_stock: i64,
    pub unit: String,
    pub reorder_level: i32,
    pub suggested_quantity: i32,
    pub priority: String,
    pub days_to_stockout: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpiringRow {
    pub product_name: String,
    pub batch_number: String,
    pub supplier_name: String,
    pub expiry_date: NaiveDate,
    pub days_to_expiry: i64,
    pub quantity: i32,
}

impl From<&LowStockAlert> for AlertRow {
    fn from(alert: &LowStockAlert) -> Self {
        Self {
            product_name: alert.product_name.clone(),
            sku: alert.sku.clone(),
            current_stock: alert.current_stock,
            unit: alert.unit.clone(),
            reorder_level: alert.reorder_level,
            suggested_quantity: alert.suggested_quantity,
            priority: alert.priority.as_str().to_string(),
            days_to_stockout: alert.days_to_stockout,
        }
    }
}

impl ExpiringRow {
    fn from_listing(listing: &BatchListing, today: NaiveDate) -> Self {
        Self {
            product_name: listing.product_name.clone(),
            batch_number: listing.batch.batch_number.clone(),
            supplier_name: listing.supplier_name.clone(),
            expiry_date: listing.batch.expiry_date,
            days_to_expiry: listing.batch.days_to_expiry(today),
            quantity: listing.batch.quantity,
        }
    }
}

/// Builds the digest, or `None` when there is nothing to report.
pub fn build_digest(
    tenant: &Tenant,
    alerts: &[LowStockAlert],
    expiring: &[BatchListing],
    today: NaiveDate,
    warning_days: i64,
    now: DateTime<Utc>,
) -> Option<Digest> {
    if alerts.is_empty() && expiring.is_empty() {
        return None;
    }

    Some(Digest {
        tenant_name: tenant.name.clone(),
        generated_at: now.format("%Y-%m-%d %H:%M UTC").to_string(),
        warning_days,
        summary: AlertSummary::from_alerts(alerts),
        alerts: alerts.iter().take(MAX_DIGEST_ROWS).map(AlertRow::from).collect(),
        expiring: expiring
            .iter()
            .take(MAX_DIGEST_ROWS)
            .map(|listing| ExpiringRow::from_listing(listing, today))
            .collect(),
        expiring_count: expiring.len(),
        expiring_units: expiring.iter().map(|l| i64::from(l.batch.quantity)).sum(),
        more_alerts: alerts.len().saturating_sub(MAX_DIGEST_ROWS),
        more_expiring: expiring.len().saturating_sub(MAX_DIGEST_ROWS),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use pharmy_models::{generate_alerts, AlertPolicy, Batch, ProductCategory, StockSnapshot};
    use uuid::Uuid;

    pub(crate) fn snapshot(name: &str, stock: i64, reorder: i32) -> StockSnapshot {
        StockSnapshot {
            product_id: Uuid::new_v4(),
            product_name: name.to_string(),
            sku: format!("SKU-{}", name.to_uppercase()),
            category: ProductCategory::Otc,
            unit: "strip".to_string(),
            reorder_level: reorder,
            current_stock: stock,
            expiring_soon_stock: 0,
        }
    }

    pub(crate) fn listing(product: &str, quantity: i32, expiry: NaiveDate) -> BatchListing {
        let now = Utc::now();
        BatchListing {
            batch: Batch {
                id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                supplier_id: Uuid::new_v4(),
                batch_number: format!("B-{}", product.to_uppercase()),
                mfg_date: expiry - Duration::days(365),
                expiry_date: expiry,
                quantity,
                cost_price: 10.0,
                selling_price: 12.5,
                created_at: now,
                updated_at: now,
            },
            product_name: product.to_string(),
            sku: format!("SKU-{}", product.to_uppercase()),
            supplier_name: "Medline Distributors".to_string(),
            reorder_level: 10,
        }
    }

    #[test]
    fn test_nothing_to_report() {
        let tenant = Tenant::new("Green Cross Pharmacy".to_string());
        let today = Utc::now().date_naive();
        assert!(build_digest(&tenant, &[], &[], today, 30, Utc::now()).is_none());
    }

    #[test]
    fn test_digest_from_alerts_and_expiring_batches() {
        let tenant = Tenant::new("Green Cross Pharmacy".to_string());
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let alerts = generate_alerts(
            &[
                snapshot("paracetamol", 0, 20),
                snapshot("cetirizine", 8, 10),
                snapshot("ibuprofen", 200, 10),
            ],
            &AlertPolicy::default(),
        );
        let expiring = vec![listing("amoxicillin", 40, today + Duration::days(12))];

        let digest = build_digest(&tenant, &alerts, &expiring, today, 30, Utc::now()).unwrap();
        assert_eq!(digest.tenant_name, "Green Cross Pharmacy");
        assert_eq!(digest.alerts.len(), 2);
        assert_eq!(digest.alerts[0].product_name, "paracetamol");
        assert_eq!(digest.summary.out_of_stock, 1);
        assert_eq!(digest.expiring[0].days_to_expiry, 12);
        assert_eq!(digest.expiring_units, 40);
        assert_eq!(digest.more_alerts, 0);
    }

    #[test]
    fn test_long_sections_are_capped() {
        let tenant = Tenant::new("Green Cross Pharmacy".to_string());
        let today = Utc::now().date_naive();
        let snapshots: Vec<_> = (0..30).map(|i| snapshot(&format!("item{:02}", i), 1, 10)).collect();
        let alerts = generate_alerts(&snapshots, &AlertPolicy::default());

        let digest = build_digest(&tenant, &alerts, &[], today, 30, Utc::now()).unwrap();
        assert_eq!(digest.alerts.len(), MAX_DIGEST_ROWS);
        assert_eq!(digest.more_alerts, 5);
        assert_eq!(digest.summary.total_alerts, 30);
        assert!(digest.expiring.is_empty());
    }
}
