//! Users, roles and staff profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::tenant::LimitedResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    User,
    Pharmacist,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Pharmacist => "PHARMACIST",
            Self::Admin => "ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "USER" => Some(Self::User),
            "PHARMACIST" => Some(Self::Pharmacist),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Staff can manage stock, sales and prescription validation.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Pharmacist | Self::Admin)
    }

    /// The tier limit that governs how many users of this role a tenant may have.
    pub fn limited_resource(&self) -> Option<LimitedResource> {
        match self {
            Self::Admin => Some(LimitedResource::Admins),
            Self::Pharmacist => Some(LimitedResource::Pharmacists),
            Self::User => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(tenant_id: Uuid, name: String, email: String, role: UserRole, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name,
            email: normalize_email(&email),
            phone_number: None,
            role,
            is_active: true,
            password_hash,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub qualifications: Option<String>,
    pub experience: Option<String>,
    pub bio: Option<String>,
    /// Storage-relative path of the uploaded profile picture.
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,
    pub role: String,
    #[validate(length(min = 10, max = 15, message = "Phone number must be between 10 and 15 characters"))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 10, max = 15, message = "Phone number must be between 10 and 15 characters"))]
    pub phone_number: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    #[validate]
    pub profile: Option<UpdateProfile>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProfile {
    #[validate(length(min = 10, max = 15, message = "Phone must be between 10 and 15 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 100, message = "Specialization must be at most 100 characters"))]
    pub specialization: Option<String>,
    #[validate(length(max = 500, message = "Address must be at most 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 50, message = "License number must be at most 50 characters"))]
    pub license_number: Option<String>,
    #[validate(length(max = 500))]
    pub qualifications: Option<String>,
    #[validate(length(max = 200))]
    pub experience: Option<String>,
    #[validate(length(max = 1000, message = "Bio must be at most 1000 characters"))]
    pub bio: Option<String>,
}

impl UpdateProfile {
    /// Fields reserved for staff profiles.
    pub fn has_professional_fields(&self) -> bool {
        self.specialization.is_some()
            || self.license_number.is_some()
            || self.qualifications.is_some()
            || self.experience.is_some()
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(v) = &self.phone {
            profile.phone = Some(v.clone());
        }
        if let Some(v) = &self.specialization {
            profile.specialization = Some(v.clone());
        }
        if let Some(v) = &self.address {
            profile.address = Some(v.clone());
        }
        if let Some(v) = &self.license_number {
            profile.license_number = Some(v.clone());
        }
        if let Some(v) = &self.qualifications {
            profile.qualifications = Some(v.clone());
        }
        if let Some(v) = &self.experience {
            profile.experience = Some(v.clone());
        }
        if let Some(v) = &self.bio {
            profile.bio = Some(v.clone());
        }
    }
}
