//! Supplier records for the stock-receipt side of the pharmacy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub gst_number: Option<String>,
    pub contact_person: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Supplier with the number of batches received from it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SupplierSummary {
    #[serde(flatten)]
    pub supplier: Supplier,
    pub batch_count: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSupplier {
    #[validate(length(min = 2, max = 200, message = "Supplier name must be between 2 and 200 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Phone must be between 10 and 15 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 15, message = "GST number must be at most 15 characters"))]
    pub gst_number: Option<String>,
    #[validate(length(max = 100, message = "Contact person must be at most 100 characters"))]
    pub contact_person: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSupplier {
    #[validate(length(min = 2, max = 200, message = "Supplier name must be between 2 and 200 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Phone must be between 10 and 15 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 15, message = "GST number must be at most 15 characters"))]
    pub gst_number: Option<String>,
    #[validate(length(max = 100, message = "Contact person must be at most 100 characters"))]
    pub contact_person: Option<String>,
}

impl Supplier {
    pub fn from_request(tenant_id: Uuid, request: CreateSupplier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: request.name.trim().to_string(),
            email: request.email.map(|e| e.trim().to_lowercase()),
            phone: request.phone,
            address: request.address,
            gst_number: request.gst_number.map(|g| g.trim().to_uppercase()),
            contact_person: request.contact_person,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: UpdateSupplier) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = update.email {
            self.email = Some(email.trim().to_lowercase());
        }
        if update.phone.is_some() {
            self.phone = update.phone;
        }
        if update.address.is_some() {
            self.address = update.address;
        }
        if let Some(gst) = update.gst_number {
            self.gst_number = Some(gst.trim().to_uppercase());
        }
        if update.contact_person.is_some() {
            self.contact_person = update.contact_person;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_create_supplier_validation() {
        let request = CreateSupplier {
            name: "M".to_string(),
            email: Some("not-an-email".to_string()),
            phone: None,
            address: None,
            gst_number: None,
            contact_person: None,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn test_from_request_normalizes() {
        let supplier = Supplier::from_request(
            Uuid::new_v4(),
            CreateSupplier {
                name: "  MedLine Distributors ".to_string(),
                email: Some("Orders@MedLine.in".to_string()),
                phone: Some("9876543210".to_string()),
                address: None,
                gst_number: Some("27abcde1234f1z5".to_string()),
                contact_person: None,
            },
        );
        assert_eq!(supplier.name, "MedLine Distributors");
        assert_eq!(supplier.email.as_deref(), Some("orders@medline.in"));
        assert_eq!(supplier.gst_number.as_deref(), Some("27ABCDE1234F1Z5"));
    }
}
