//! Low-stock alert generation and reorder suggestions.
//!
//! A product raises an alert when its in-stock quantity is at or below its
//! reorder level. Priority reflects how far below the level it has fallen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::product::ProductCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
}

impl AlertPriority {
    /// HIGH when out of stock or at no more than half the reorder level,
    /// LOW above 80% of it, MEDIUM in between.
    pub fn classify(current_stock: i64, reorder_level: i32) -> Self {
        let level = i64::from(reorder_level.max(0));
        if current_stock <= 0 || current_stock * 10 <= level * 5 {
            Self::High
        } else if current_stock * 10 > level * 8 {
            Self::Low
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
}

/// Tunables for alert arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub min_reorder_quantity: i32,
    pub assumed_daily_usage: i32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            min_reorder_quantity: 50,
            assumed_daily_usage: 5,
        }
    }
}

impl AlertPolicy {
    pub fn suggested_quantity(&self, reorder_level: i32) -> i32 {
        reorder_level.saturating_mul(2).max(self.min_reorder_quantity)
    }

    pub fn days_to_stockout(&self, current_stock: i64) -> i64 {
        if current_stock <= 0 {
            return 0;
        }
        let usage = i64::from(self.assumed_daily_usage.max(1));
        (current_stock + usage - 1) / usage
    }
}

/// Per-product stock figures an alert is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct StockSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub category: ProductCategory,
    pub unit: String,
    pub reorder_level: i32,
    pub current_stock: i64,
    pub expiring_soon_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LowStockAlert {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub category: ProductCategory,
    pub unit: String,
    pub current_stock: i64,
    pub reorder_level: i32,
    pub suggested_quantity: i32,
    pub expiring_soon_stock: i64,
    pub priority: AlertPriority,
    pub stock_status: StockStatus,
    pub days_to_stockout: i64,
}

impl LowStockAlert {
    pub fn evaluate(snapshot: &StockSnapshot, policy: &AlertPolicy) -> Option<Self> {
        if snapshot.current_stock > i64::from(snapshot.reorder_level) {
            return None;
        }
        let stock_status = if snapshot.current_stock <= 0 {
            StockStatus::OutOfStock
        } else {
            StockStatus::LowStock
        };
        Some(Self {
            product_id: snapshot.product_id,
            product_name: snapshot.product_name.clone(),
            sku: snapshot.sku.clone(),
            category: snapshot.category,
            unit: snapshot.unit.clone(),
            current_stock: snapshot.current_stock.max(0),
            reorder_level: snapshot.reorder_level,
            suggested_quantity: policy.suggested_quantity(snapshot.reorder_level),
            expiring_soon_stock: snapshot.expiring_soon_stock,
            priority: AlertPriority::classify(snapshot.current_stock, snapshot.reorder_level),
            stock_status,
            days_to_stockout: policy.days_to_stockout(snapshot.current_stock),
        })
    }
}

/// Alerts for every snapshot at or below its reorder level, most urgent first.
/// Ties fall back to lowest stock, then product name.
pub fn generate_alerts(snapshots: &[StockSnapshot], policy: &AlertPolicy) -> Vec<LowStockAlert> {
    let mut alerts: Vec<LowStockAlert> = snapshots
        .iter()
        .filter_map(|s| LowStockAlert::evaluate(s, policy))
        .collect();

    alerts.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.current_stock.cmp(&b.current_stock))
            .then_with(|| a.product_name.cmp(&b.product_name))
    });
    alerts
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    pub out_of_stock: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[LowStockAlert]) -> Self {
        let count = |p: AlertPriority| alerts.iter().filter(|a| a.priority == p).count();
        Self {
            total_alerts: alerts.len(),
            high_priority: count(AlertPriority::High),
            medium_priority: count(AlertPriority::Medium),
            low_priority: count(AlertPriority::Low),
            out_of_stock: alerts
                .iter()
                .filter(|a| a.stock_status == StockStatus::OutOfStock)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorderSuggestion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub current_stock: i64,
    pub reorder_level: i32,
    pub suggested_quantity: i32,
    pub priority: AlertPriority,
    pub reason: String,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ReorderSuggestion {
    pub fn from_alert(tenant_id: Uuid, alert: &LowStockAlert) -> Self {
        let reason = match alert.stock_status {
            StockStatus::OutOfStock => format!("{} is out of stock", alert.product_name),
            StockStatus::LowStock => format!(
                "{} has {} {} left (reorder level {})",
                alert.product_name, alert.current_stock, alert.unit, alert.reorder_level
            ),
        };
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            product_id: alert.product_id,
            current_stock: alert.current_stock,
            reorder_level: alert.reorder_level,
            suggested_quantity: alert.suggested_quantity,
            priority: alert.priority,
            reason,
            is_processed: false,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, stock: i64, reorder: i32) -> StockSnapshot {
        StockSnapshot {
            product_id: Uuid::new_v4(),
            product_name: name.to_string(),
            sku: format!("SKU-{}", name),
            category: ProductCategory::Otc,
            unit: "strip".to_string(),
            reorder_level: reorder,
            current_stock: stock,
            expiring_soon_stock: 0,
        }
    }

    #[test]
    fn test_priority_thresholds() {
        assert_eq!(AlertPriority::classify(0, 10), AlertPriority::High);
        assert_eq!(AlertPriority::classify(5, 10), AlertPriority::High);
        assert_eq!(AlertPriority::classify(6, 10), AlertPriority::Medium);
        assert_eq!(AlertPriority::classify(8, 10), AlertPriority::Medium);
        assert_eq!(AlertPriority::classify(9, 10), AlertPriority::Low);
        assert_eq!(AlertPriority::classify(0, 0), AlertPriority::High);
    }

    #[test]
    fn test_no_alert_above_reorder_level() {
        let policy = AlertPolicy::default();
        assert!(LowStockAlert::evaluate(&snapshot("A", 11, 10), &policy).is_none());
        assert!(LowStockAlert::evaluate(&snapshot("A", 10, 10), &policy).is_some());
    }

    #[test]
    fn test_suggested_quantity_and_stockout() {
        let policy = AlertPolicy::default();
        assert_eq!(policy.suggested_quantity(10), 50);
        assert_eq!(policy.suggested_quantity(40), 80);
        assert_eq!(policy.days_to_stockout(0), 0);
        assert_eq!(policy.days_to_stockout(1), 1);
        assert_eq!(policy.days_to_stockout(11), 3);
    }

    #[test]
    fn test_alert_ordering() {
        let policy = AlertPolicy::default();
        let alerts = generate_alerts(
            &[
                snapshot("Cetirizine", 9, 10),
                snapshot("Paracetamol", 0, 10),
                snapshot("Ibuprofen", 7, 10),
                snapshot("Amoxicillin", 3, 10),
                snapshot("Vitamin C", 100, 10),
            ],
            &policy,
        );
        let names: Vec<&str> = alerts.iter().map(|a| a.product_name.as_str()).collect();
        assert_eq!(names, vec!["Paracetamol", "Amoxicillin", "Ibuprofen", "Cetirizine"]);

        let summary = AlertSummary::from_alerts(&alerts);
        assert_eq!(summary.total_alerts, 4);
        assert_eq!(summary.high_priority, 2);
        assert_eq!(summary.medium_priority, 1);
        assert_eq!(summary.low_priority, 1);
        assert_eq!(summary.out_of_stock, 1);
    }

    #[test]
    fn test_suggestion_reason() {
        let policy = AlertPolicy::default();
        let alert = LowStockAlert::evaluate(&snapshot("Paracetamol", 0, 10), &policy).unwrap();
        let suggestion = ReorderSuggestion::from_alert(Uuid::new_v4(), &alert);
        assert_eq!(suggestion.reason, "Paracetamol is out of stock");
        assert!(!suggestion.is_processed);
        assert_eq!(suggestion.suggested_quantity, 50);
    }
}
