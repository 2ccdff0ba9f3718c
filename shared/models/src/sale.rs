//! Sales (invoices) and their amount arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    Wallet,
    NetBanking,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Card => "CARD",
            Self::Upi => "UPI",
            Self::Wallet => "WALLET",
            Self::NetBanking => "NET_BANKING",
            Self::Cheque => "CHEQUE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "CASH" => Some(Self::Cash),
            "CARD" => Some(Self::Card),
            "UPI" => Some(Self::Upi),
            "WALLET" => Some(Self::Wallet),
            "NET_BANKING" | "NETBANKING" => Some(Self::NetBanking),
            "CHEQUE" | "CHECK" => Some(Self::Cheque),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl SaleStatus {
    pub fn can_transition_to(&self, target: SaleStatus) -> bool {
        use SaleStatus::*;

        match (self, target) {
            (Pending, Processing) => true,
            (Pending, Completed) => true,
            (Pending, Cancelled) => true,

            (Processing, Completed) => true,
            (Processing, Cancelled) => true,

            // Cancelling a completed sale returns its stock
            (Completed, Cancelled) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sale {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sale_number: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub prescription_id: Option<Uuid>,
    pub sold_by: Uuid,
    pub subtotal: f64,
    pub gst_amount: f64,
    pub discount: f64,
    pub total_amount: f64,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleItem {
    pub id: Uuid,
    pub sale_id: Uuid,
    pub product_id: Uuid,
    pub batch_id: Uuid,
    pub quantity: i32,
    pub unit_price: f64,
    pub gst_rate: f64,
    pub gst_amount: f64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaleDetail {
    #[serde(flatten)]
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSale {
    #[validate(length(max = 100, message = "Customer name must be at most 100 characters"))]
    pub customer_name: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Customer phone must be between 10 and 15 characters"))]
    pub customer_phone: Option<String>,
    pub prescription_id: Option<Uuid>,
    pub payment_method: String,
    #[validate(range(min = 0.0, message = "Discount must be non-negative"))]
    pub discount: Option<f64>,
    #[validate]
    pub items: Vec<CreateSaleItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSaleItem {
    pub product_id: Uuid,
    /// Draw only from this batch instead of first-expiry order.
    pub batch_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    /// Zero or absent means the batch selling price.
    #[validate(range(min = 0.0, message = "Unit price must be non-negative"))]
    pub unit_price: Option<f64>,
}

/// A validated sale ready to be allocated against stock.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleDraft {
    pub tenant_id: Uuid,
    pub sold_by: Uuid,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub prescription_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    pub discount: f64,
    pub lines: Vec<DraftLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub batch_id: Option<Uuid>,
    pub quantity: i32,
    /// `None` means the allocated batch's selling price.
    pub unit_price: Option<f64>,
    pub gst_rate: f64,
}

impl DraftLine {
    pub fn price_for(&self, batch_selling_price: f64) -> f64 {
        match self.unit_price {
            Some(price) if price > 0.0 => price,
            _ => batch_selling_price,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineAmounts {
    pub subtotal: f64,
    pub gst_amount: f64,
    pub total_amount: f64,
}

impl LineAmounts {
    pub fn compute(unit_price: f64, quantity: i32, gst_rate: f64) -> Self {
        let subtotal = round2(unit_price * f64::from(quantity));
        let gst_amount = round2(subtotal * gst_rate / 100.0);
        Self {
            subtotal,
            gst_amount,
            total_amount: round2(subtotal + gst_amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SaleTotals {
    pub subtotal: f64,
    pub gst_amount: f64,
    pub discount: f64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum SaleAmountError {
    #[error("Discount {discount} exceeds the bill amount {gross}")]
    DiscountTooLarge { discount: f64, gross: f64 },
    #[error("Discount must be non-negative")]
    NegativeDiscount,
}

/// total = subtotal + gst - discount, each rounded to two decimals.
pub fn compute_totals(lines: &[LineAmounts], discount: f64) -> Result<SaleTotals, SaleAmountError> {
    if discount < 0.0 {
        return Err(SaleAmountError::NegativeDiscount);
    }
    let subtotal = round2(lines.iter().map(|l| l.subtotal).sum());
    let gst_amount = round2(lines.iter().map(|l| l.gst_amount).sum());
    let gross = round2(subtotal + gst_amount);
    let discount = round2(discount);
    if discount > gross {
        return Err(SaleAmountError::DiscountTooLarge { discount, gross });
    }
    Ok(SaleTotals {
        subtotal,
        gst_amount,
        discount,
        total_amount: round2(gross - discount),
    })
}

/// `SALE-<year>-<sequence padded to 6>`.
pub fn format_sale_number(year: i32, sequence: i64) -> String {
    format!("SALE-{}-{:06}", year, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_amounts() {
        let line = LineAmounts::compute(12.5, 4, 12.0);
        assert_eq!(line.subtotal, 50.0);
        assert_eq!(line.gst_amount, 6.0);
        assert_eq!(line.total_amount, 56.0);
    }

    #[test]
    fn test_totals_with_discount() {
        let lines = [LineAmounts::compute(10.0, 2, 5.0), LineAmounts::compute(3.33, 3, 0.0)];
        let totals = compute_totals(&lines, 1.0).unwrap();
        assert_eq!(totals.subtotal, 29.99);
        assert_eq!(totals.gst_amount, 1.0);
        assert_eq!(totals.total_amount, 29.99);
    }

    #[test]
    fn test_discount_cannot_exceed_bill() {
        let lines = [LineAmounts::compute(10.0, 1, 0.0)];
        assert!(matches!(
            compute_totals(&lines, 10.01),
            Err(SaleAmountError::DiscountTooLarge { .. })
        ));
        assert_eq!(compute_totals(&lines, 10.0).unwrap().total_amount, 0.0);
    }

    #[test]
    fn test_zero_unit_price_uses_batch_price() {
        let line = DraftLine {
            product_id: Uuid::nil(),
            product_name: "Cetirizine".to_string(),
            batch_id: None,
            quantity: 1,
            unit_price: Some(0.0),
            gst_rate: 12.0,
        };
        assert_eq!(line.price_for(4.5), 4.5);
        assert_eq!(DraftLine { unit_price: Some(5.0), ..line }.price_for(4.5), 5.0);
    }

    #[test]
    fn test_sale_number_format() {
        assert_eq!(format_sale_number(2024, 1), "SALE-2024-000001");
        assert_eq!(format_sale_number(2025, 123456), "SALE-2025-123456");
    }

    #[test]
    fn test_status_transitions() {
        assert!(SaleStatus::Completed.can_transition_to(SaleStatus::Cancelled));
        assert!(!SaleStatus::Cancelled.can_transition_to(SaleStatus::Completed));
        assert!(SaleStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!(PaymentMethod::from_str("net banking"), Some(PaymentMethod::NetBanking));
        assert_eq!(PaymentMethod::from_str("upi"), Some(PaymentMethod::Upi));
        assert_eq!(PaymentMethod::from_str("barter"), None);
    }
}
