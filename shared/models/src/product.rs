//! Product catalogue models and per-product stock rollups.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::batch::Batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    Otc,
    Prescription,
    Supplement,
    MedicalDevice,
    PersonalCare,
    BabyCare,
    FirstAid,
    Ayurvedic,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otc => "OTC",
            Self::Prescription => "PRESCRIPTION",
            Self::Supplement => "SUPPLEMENT",
            Self::MedicalDevice => "MEDICAL_DEVICE",
            Self::PersonalCare => "PERSONAL_CARE",
            Self::BabyCare => "BABY_CARE",
            Self::FirstAid => "FIRST_AID",
            Self::Ayurvedic => "AYURVEDIC",
        }
    }

    /// Input is trimmed and upper-cased; spaces and dashes read as underscores.
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "OTC" => Some(Self::Otc),
            "PRESCRIPTION" => Some(Self::Prescription),
            "SUPPLEMENT" => Some(Self::Supplement),
            "MEDICAL_DEVICE" => Some(Self::MedicalDevice),
            "PERSONAL_CARE" => Some(Self::PersonalCare),
            "BABY_CARE" => Some(Self::BabyCare),
            "FIRST_AID" => Some(Self::FirstAid),
            "AYURVEDIC" => Some(Self::Ayurvedic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit: String,
    pub hsn_code: Option<String>,
    pub gst_rate: f64,
    pub price: f64,
    pub reorder_level: i32,
    pub requires_prescription: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProduct {
    #[validate(length(min = 3, max = 50, message = "SKU must be between 3 and 50 characters"))]
    pub sku: String,
    #[validate(length(min = 2, max = 200, message = "Name must be between 2 and 200 characters"))]
    pub name: String,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    pub category: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,
    #[validate(length(max = 20, message = "HSN code must be at most 20 characters"))]
    pub hsn_code: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "GST rate must be between 0 and 100"))]
    pub gst_rate: Option<f64>,
    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: f64,
    #[validate(range(min = 0, max = 1_000_000, message = "Reorder level must be non-negative"))]
    pub reorder_level: Option<i32>,
    pub requires_prescription: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProduct {
    #[validate(length(min = 3, max = 50, message = "SKU must be between 3 and 50 characters"))]
    pub sku: Option<String>,
    #[validate(length(min = 2, max = 200, message = "Name must be between 2 and 200 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    pub category: Option<String>,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,
    #[validate(length(max = 20, message = "HSN code must be at most 20 characters"))]
    pub hsn_code: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "GST rate must be between 0 and 100"))]
    pub gst_rate: Option<f64>,
    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: Option<f64>,
    #[validate(range(min = 0, max = 1_000_000, message = "Reorder level must be non-negative"))]
    pub reorder_level: Option<i32>,
    pub requires_prescription: Option<bool>,
}

/// Stock rollup derived from a product's batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub total_stock: i64,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub expiring_soon_count: i64,
    pub expiring_soon_stock: i64,
}

impl StockLevel {
    /// Only batches with positive quantity count. A batch is "expiring soon"
    /// when it expires between today and `warning_days` from today.
    pub fn from_batches<'a>(
        reorder_level: i32,
        batches: impl IntoIterator<Item = &'a Batch>,
        today: NaiveDate,
        warning_days: i64,
    ) -> Self {
        let mut level = StockLevel::default();
        for batch in batches.into_iter().filter(|b| b.quantity > 0) {
            level.total_stock += i64::from(batch.quantity);
            if batch.is_expiring_soon(today, warning_days) {
                level.expiring_soon_count += 1;
                level.expiring_soon_stock += i64::from(batch.quantity);
            }
        }
        level.is_low_stock = level.total_stock <= i64::from(reorder_level);
        level.is_out_of_stock = level.total_stock == 0;
        level
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductWithStock {
    #[serde(flatten)]
    pub product: Product,
    #[serde(flatten)]
    pub stock: StockLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn batch(quantity: i32, expires_in: i64, today: NaiveDate) -> Batch {
        Batch {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            product_id: Uuid::nil(),
            supplier_id: Uuid::nil(),
            batch_number: "B1".to_string(),
            mfg_date: today - Duration::days(100),
            expiry_date: today + Duration::days(expires_in),
            quantity,
            cost_price: 1.0,
            selling_price: 2.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(ProductCategory::from_str(" otc "), Some(ProductCategory::Otc));
        assert_eq!(ProductCategory::from_str("first aid"), Some(ProductCategory::FirstAid));
        assert_eq!(ProductCategory::from_str("medical-device"), Some(ProductCategory::MedicalDevice));
        assert_eq!(ProductCategory::from_str("toys"), None);
    }

    #[test]
    fn test_stock_level_ignores_empty_batches() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let batches = vec![batch(0, 10, today), batch(4, 10, today), batch(8, 200, today)];
        let level = StockLevel::from_batches(10, &batches, today, 30);

        assert_eq!(level.total_stock, 12);
        assert!(!level.is_low_stock);
        assert_eq!(level.expiring_soon_count, 1);
        assert_eq!(level.expiring_soon_stock, 4);
    }

    #[test]
    fn test_stock_level_at_reorder_level_is_low() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let batches = vec![batch(10, 300, today)];
        let level = StockLevel::from_batches(10, &batches, today, 30);
        assert!(level.is_low_stock);
        assert!(!level.is_out_of_stock);

        let empty: Vec<Batch> = Vec::new();
        let level = StockLevel::from_batches(10, &empty, today, 30);
        assert!(level.is_out_of_stock);
    }
}
