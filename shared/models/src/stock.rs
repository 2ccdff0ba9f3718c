use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock received as a new batch
    In,
    /// Stock dispensed through a sale
    Out,
    /// Manual correction, signed
    Adjustment,
    /// Stock put back by a cancelled sale
    Return,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Adjustment => "ADJUSTMENT",
            Self::Return => "RETURN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "IN" => Some(Self::In),
            "OUT" => Some(Self::Out),
            "ADJUSTMENT" => Some(Self::Adjustment),
            "RETURN" => Some(Self::Return),
            _ => None,
        }
    }
}

/// One signed change to a batch quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovement {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub batch_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reason: Option<String>,
    pub reference_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        tenant_id: Uuid,
        product_id: Uuid,
        batch_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            product_id,
            batch_id,
            movement_type,
            quantity,
            reason: None,
            reference_id: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn by_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StockAdjustment {
    pub batch_id: Uuid,
    /// Signed delta applied to the batch quantity.
    #[validate(range(min = -1_000_000, max = 1_000_000))]
    pub quantity_change: i32,
    #[validate(length(min = 3, max = 500, message = "Reason must be between 3 and 500 characters"))]
    pub reason: String,
}

/// Stock rule violations found while holding batch row locks.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StockError {
    #[error("Insufficient stock for {product}: requested {requested}, available {available}")]
    Insufficient {
        product: String,
        requested: i32,
        available: i64,
    },
    #[error("Batch {batch} is not available for {product}")]
    BatchUnavailable { batch: String, product: String },
    #[error("Adjustment would leave batch {batch_number} with {resulting} units")]
    NegativeQuantity { batch_number: String, resulting: i64 },
}

/// Average daily outflow over a window divided by average stock on hand.
pub fn turnover_rate(units_out: i64, window_days: i64, units_on_hand: i64) -> f64 {
    if window_days <= 0 || units_on_hand <= 0 {
        return 0.0;
    }
    let daily = units_out as f64 / window_days as f64;
    ((daily / units_on_hand as f64) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_builder() {
        let sale_id = Uuid::new_v4();
        let movement = StockMovement::new(Uuid::nil(), Uuid::nil(), Uuid::nil(), MovementType::Out, -3)
            .with_reference(sale_id)
            .with_reason("Sale");
        assert_eq!(movement.reference_id, Some(sale_id));
        assert_eq!(movement.quantity, -3);
    }

    #[test]
    fn test_stock_error_messages_name_the_product() {
        let err = StockError::Insufficient {
            product: "Paracetamol 500mg".to_string(),
            requested: 12,
            available: 7,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Paracetamol 500mg: requested 12, available 7"
        );
    }

    #[test]
    fn test_turnover_rate() {
        assert_eq!(turnover_rate(70, 7, 100), 0.1);
        assert_eq!(turnover_rate(70, 7, 0), 0.0);
        assert_eq!(turnover_rate(0, 7, 100), 0.0);
    }
}
