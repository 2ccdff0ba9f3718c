//! Stock batches and first-expiry-first-out allocation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub batch_number: String,
    pub mfg_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub cost_price: f64,
    pub selling_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Whole days until expiry. Negative once expired.
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    pub fn is_expiring_soon(&self, today: NaiveDate, warning_days: i64) -> bool {
        (0..=warning_days).contains(&self.days_to_expiry(today))
    }

    pub fn stock_value(&self) -> f64 {
        f64::from(self.quantity.max(0)) * self.cost_price
    }

    pub fn view(&self, today: NaiveDate, warning_days: i64, low_quantity: i32) -> BatchView {
        BatchView {
            batch: self.clone(),
            days_to_expiry: self.days_to_expiry(today),
            is_expired: self.is_expired(today),
            is_expiring_soon: self.is_expiring_soon(today, warning_days),
            is_low_stock: self.quantity <= low_quantity,
        }
    }
}

/// Batch plus expiry flags as returned by the API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchView {
    #[serde(flatten)]
    pub batch: Batch,
    pub days_to_expiry: i64,
    pub is_expired: bool,
    pub is_expiring_soon: bool,
    pub is_low_stock: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatch {
    #[validate(length(min = 1, max = 50, message = "Batch number must be between 1 and 50 characters"))]
    pub batch_number: String,
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub mfg_date: NaiveDate,
    pub expiry_date: NaiveDate,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(range(min = 0.0, message = "Cost price must be non-negative"))]
    pub cost_price: f64,
    #[validate(range(min = 0.0, message = "Selling price must be non-negative"))]
    pub selling_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBatch {
    #[validate(length(min = 1, max = 50, message = "Batch number must be between 1 and 50 characters"))]
    pub batch_number: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub mfg_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(range(min = 0, message = "Quantity must be non-negative"))]
    pub quantity: Option<i32>,
    #[validate(range(min = 0.0, message = "Cost price must be non-negative"))]
    pub cost_price: Option<f64>,
    #[validate(range(min = 0.0, message = "Selling price must be non-negative"))]
    pub selling_price: Option<f64>,
}

impl UpdateBatch {
    /// Copies the fields that were sent onto `batch`. Dates are re-checked
    /// against each other when either one changes.
    pub fn apply_to(&self, batch: &mut Batch, today: NaiveDate) -> Result<(), BatchDateError> {
        if self.mfg_date.is_some() || self.expiry_date.is_some() {
            let mfg_date = self.mfg_date.unwrap_or(batch.mfg_date);
            let expiry_date = self.expiry_date.unwrap_or(batch.expiry_date);
            validate_batch_dates(mfg_date, expiry_date, today)?;
            batch.mfg_date = mfg_date;
            batch.expiry_date = expiry_date;
        }
        if let Some(number) = &self.batch_number {
            batch.batch_number = number.trim().to_string();
        }
        if let Some(supplier_id) = self.supplier_id {
            batch.supplier_id = supplier_id;
        }
        if let Some(quantity) = self.quantity {
            batch.quantity = quantity;
        }
        if let Some(cost_price) = self.cost_price {
            batch.cost_price = cost_price;
        }
        if let Some(selling_price) = self.selling_price {
            batch.selling_price = selling_price;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BatchDateError {
    #[error("Expiry date must be in the future")]
    ExpiryNotInFuture,
    #[error("Manufacturing date cannot be in the future")]
    ManufacturedInFuture,
    #[error("Manufacturing date must be before expiry date")]
    ManufacturedAfterExpiry,
}

impl BatchDateError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::ExpiryNotInFuture => "expiry_date",
            Self::ManufacturedInFuture | Self::ManufacturedAfterExpiry => "mfg_date",
        }
    }
}

pub fn validate_batch_dates(
    mfg_date: NaiveDate,
    expiry_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), BatchDateError> {
    if expiry_date <= today {
        return Err(BatchDateError::ExpiryNotInFuture);
    }
    if mfg_date > today {
        return Err(BatchDateError::ManufacturedInFuture);
    }
    if mfg_date >= expiry_date {
        return Err(BatchDateError::ManufacturedAfterExpiry);
    }
    Ok(())
}

/// The part of a batch FEFO allocation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStock {
    pub batch_id: Uuid,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub selling_price: f64,
}

impl From<&Batch> for BatchStock {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id,
            expiry_date: batch.expiry_date,
            quantity: batch.quantity,
            selling_price: batch.selling_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub batch_id: Uuid,
    pub quantity: i32,
    pub selling_price: f64,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Insufficient stock: requested {requested}, available {available}")]
pub struct InsufficientStock {
    pub requested: i32,
    pub available: i64,
}

/// Draws `quantity` units from the batches expiring first. Expired and empty
/// batches are skipped; equal expiry dates are ordered by batch id.
pub fn allocate_fefo(
    batches: &[BatchStock],
    quantity: i32,
    today: NaiveDate,
) -> Result<Vec<Allocation>, InsufficientStock> {
    let mut usable: Vec<&BatchStock> = batches
        .iter()
        .filter(|b| b.quantity > 0 && b.expiry_date >= today)
        .collect();
    usable.sort_by(|a, b| {
        a.expiry_date
            .cmp(&b.expiry_date)
            .then_with(|| a.batch_id.cmp(&b.batch_id))
    });

    let available: i64 = usable.iter().map(|b| i64::from(b.quantity)).sum();
    if quantity <= 0 || available < i64::from(quantity) {
        return Err(InsufficientStock {
            requested: quantity,
            available,
        });
    }

    let mut remaining = quantity;
    let mut allocations = Vec::new();
    for batch in usable {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        allocations.push(Allocation {
            batch_id: batch.batch_id,
            quantity: take,
            selling_price: batch.selling_price,
        });
        remaining -= take;
    }

    Ok(allocations)
}
