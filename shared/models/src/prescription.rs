//! Prescription records and their validation lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Prescription states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    /// Created from form data, nothing extracted yet
    Uploaded,
    /// A scan was attached and awaits a pharmacist
    PendingValidation,
    /// Approved for dispensing
    Validated,
    /// Refused by a pharmacist
    Rejected,
}

impl PrescriptionStatus {
    pub fn can_transition_to(&self, target: PrescriptionStatus) -> bool {
        use PrescriptionStatus::*;

        match (self, target) {
            (Uploaded, PendingValidation) => true,
            (Uploaded, Validated) => true,
            (Uploaded, Rejected) => true,

            (PendingValidation, Validated) => true,
            (PendingValidation, Rejected) => true,

            (Validated, _) => false,
            (Rejected, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::PendingValidation => "PENDING_VALIDATION",
            Self::Validated => "VALIDATED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "UPLOADED" => Some(Self::Uploaded),
            "PENDING_VALIDATION" | "PENDING" => Some(Self::PendingValidation),
            "VALIDATED" => Some(Self::Validated),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_age: Option<i32>,
    pub doctor_name: Option<String>,
    pub uploaded_by: Uuid,
    pub validated_by: Option<Uuid>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub extracted_text: Option<String>,
    pub status: PrescriptionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    pub fn new(tenant_id: Uuid, uploaded_by: Uuid, request: &CreatePrescription) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            patient_name: request.patient_name.trim().to_string(),
            patient_phone: request.patient_phone.clone(),
            patient_age: request.patient_age,
            doctor_name: request.doctor_name.clone(),
            uploaded_by,
            validated_by: None,
            file_url: None,
            file_name: None,
            extracted_text: None,
            status: PrescriptionStatus::Uploaded,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionItem {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub product_id: Option<Uuid>,
    pub medicine_name: String,
    pub dosage: Option<String>,
    pub quantity: Option<i32>,
    pub instructions: Option<String>,
}

impl PrescriptionItem {
    pub fn from_request(prescription_id: Uuid, request: &CreatePrescriptionItem) -> Self {
        Self {
            id: Uuid::new_v4(),
            prescription_id,
            product_id: request.product_id,
            medicine_name: request.medicine_name.trim().to_string(),
            dosage: request.dosage.clone(),
            quantity: request.quantity,
            instructions: request.instructions.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrescriptionDetail {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePrescription {
    #[validate(length(min = 2, max = 100, message = "Patient name must be between 2 and 100 characters"))]
    pub patient_name: String,
    #[validate(length(min = 10, max = 15, message = "Patient phone must be between 10 and 15 characters"))]
    pub patient_phone: Option<String>,
    #[validate(range(min = 0, max = 150, message = "Patient age must be between 0 and 150"))]
    pub patient_age: Option<i32>,
    #[validate(length(min = 2, max = 100, message = "Doctor name must be between 2 and 100 characters"))]
    pub doctor_name: Option<String>,
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
    #[validate]
    #[serde(default)]
    pub items: Vec<CreatePrescriptionItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePrescriptionItem {
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200, message = "Medicine name is required"))]
    pub medicine_name: String,
    #[validate(length(max = 100))]
    pub dosage: Option<String>,
    #[validate(range(min = 1, max = 10_000, message = "Quantity must be at least 1"))]
    pub quantity: Option<i32>,
    #[validate(length(max = 500))]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePrescription {
    #[validate(length(min = 2, max = 100, message = "Patient name must be between 2 and 100 characters"))]
    pub patient_name: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Patient phone must be between 10 and 15 characters"))]
    pub patient_phone: Option<String>,
    #[validate(range(min = 0, max = 150, message = "Patient age must be between 0 and 150"))]
    pub patient_age: Option<i32>,
    #[validate(length(min = 2, max = 100, message = "Doctor name must be between 2 and 100 characters"))]
    pub doctor_name: Option<String>,
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
    pub status: Option<String>,
    /// Replaces the item list when present. Validated per item by the caller.
    pub items: Option<Vec<CreatePrescriptionItem>>,
}

impl UpdatePrescription {
    pub fn apply_details(&self, prescription: &mut Prescription) {
        if let Some(name) = &self.patient_name {
            prescription.patient_name = name.trim().to_string();
        }
        if self.patient_phone.is_some() {
            prescription.patient_phone = self.patient_phone.clone();
        }
        if self.patient_age.is_some() {
            prescription.patient_age = self.patient_age;
        }
        if self.doctor_name.is_some() {
            prescription.doctor_name = self.doctor_name.clone();
        }
        if self.notes.is_some() {
            prescription.notes = self.notes.clone();
        }
        prescription.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use PrescriptionStatus::*;
        assert!(Uploaded.can_transition_to(PendingValidation));
        assert!(PendingValidation.can_transition_to(Validated));
        assert!(PendingValidation.can_transition_to(Rejected));
        assert!(!Validated.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(PendingValidation));
        assert!(!PendingValidation.can_transition_to(Uploaded));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PrescriptionStatus::Validated.is_terminal());
        assert!(PrescriptionStatus::Rejected.is_terminal());
        assert!(!PrescriptionStatus::PendingValidation.is_terminal());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            PrescriptionStatus::from_str("pending_validation"),
            Some(PrescriptionStatus::PendingValidation)
        );
        assert_eq!(PrescriptionStatus::from_str("approved"), None);
    }
}
