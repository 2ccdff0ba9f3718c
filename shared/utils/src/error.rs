use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PharmyError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Authorization error: {message}")]
    Authorization { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("{resource} limit reached for the {tier} plan ({limit})")]
    LimitExceeded {
        resource: String,
        limit: i64,
        tier: String,
    },

    #[error("Feature '{feature}' is not available on the {tier} plan")]
    FeatureUnavailable { feature: String, tier: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl PharmyError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Role check failure with the message every guarded route returns.
    pub fn forbidden() -> Self {
        Self::authorization("Forbidden - Insufficient permissions")
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn limit_exceeded(resource: impl Into<String>, limit: i64, tier: impl Into<String>) -> Self {
        Self::LimitExceeded {
            resource: resource.into(),
            limit,
            tier: tier.into(),
        }
    }

    pub fn feature_unavailable(feature: impl Into<String>, tier: impl Into<String>) -> Self {
        Self::FeatureUnavailable {
            feature: feature.into(),
            tier: tier.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::FeatureUnavailable { .. } => "FEATURE_UNAVAILABLE",
            Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Database { .. } => 500,
            Self::Validation { .. } => 400,
            Self::Authentication { .. } => 401,
            Self::Authorization { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::LimitExceeded { .. } => 403,
            Self::FeatureUnavailable { .. } => 403,
            Self::RateLimit { .. } => 429,
            Self::Configuration { .. } => 500,
            Self::ExternalService { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.http_status_code() >= 500
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::LimitExceeded {
                resource,
                limit,
                tier,
            } => Some(json!({
                "limit_reached": true,
                "resource": resource,
                "limit": limit,
                "tier": tier,
            })),
            Self::FeatureUnavailable { feature, tier } => Some(json!({
                "feature": feature,
                "tier": tier,
                "upgrade_required": true,
            })),
            _ => None,
        }
    }
}

pub type PharmyResult<T> = Result<T, PharmyError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<&PharmyError> for ErrorResponse {
    fn from(error: &PharmyError) -> Self {
        // Server-side failures keep their internals in the logs only.
        let message = if error.is_server_error() && !matches!(error, PharmyError::ExternalService { .. }) {
            "An internal error occurred".to_string()
        } else {
            error.to_string()
        };

        Self {
            error: message.clone(),
            code: error.error_code().to_string(),
            message,
            details: error.details(),
        }
    }
}

impl IntoResponse for PharmyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        }

        let body = ErrorResponse::from(&self);
        (status, Json(body)).into_response()
    }
}

// Conversion from common error types
impl From<sqlx::Error> for PharmyError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => Self::not_found("record"),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                Self::conflict("A record with the same unique value already exists")
            }
            _ => Self::database(error.to_string()),
        }
    }
}

impl From<redis::RedisError> for PharmyError {
    fn from(error: redis::RedisError) -> Self {
        Self::database(error.to_string())
    }
}

impl From<reqwest::Error> for PharmyError {
    fn from(error: reqwest::Error) -> Self {
        Self::external_service("HTTP Client", error.to_string())
    }
}

impl From<serde_json::Error> for PharmyError {
    fn from(error: serde_json::Error) -> Self {
        Self::validation("JSON", error.to_string())
    }
}

impl From<anyhow::Error> for PharmyError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(stock) = error.downcast_ref::<pharmy_models::StockError>() {
            return Self::validation("quantity", stock.to_string());
        }
        if let Some(amount) = error.downcast_ref::<pharmy_models::SaleAmountError>() {
            return Self::validation("discount", amount.to_string());
        }
        if let Some(dates) = error.downcast_ref::<pharmy_models::BatchDateError>() {
            return Self::validation(dates.field(), dates.to_string());
        }
        if let Some(sqlx_error) = error.downcast_ref::<sqlx::Error>() {
            if let sqlx::Error::Database(db) = sqlx_error {
                if db.code().as_deref() == Some("23505") {
                    return Self::conflict("A record with the same unique value already exists");
                }
            }
            return Self::database(format!("{:#}", error));
        }
        Self::internal(format!("{:#}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_exceeded_maps_to_forbidden_with_details() {
        let error = PharmyError::limit_exceeded("products", 20, "Community");
        assert_eq!(error.http_status_code(), 403);
        assert_eq!(error.error_code(), "LIMIT_EXCEEDED");

        let body = ErrorResponse::from(&error);
        let details = body.details.unwrap();
        assert_eq!(details["limit_reached"], true);
        assert_eq!(details["limit"], 20);
    }

    #[test]
    fn test_internal_errors_hide_message() {
        let error = PharmyError::database("connection refused on 10.0.0.4");
        let body = ErrorResponse::from(&error);
        assert!(!body.message.contains("10.0.0.4"));
        assert_eq!(body.code, "DATABASE_ERROR");
    }

    #[test]
    fn test_client_errors_keep_message() {
        let error = PharmyError::validation("quantity", "Insufficient stock");
        let body = ErrorResponse::from(&error);
        assert!(body.message.contains("Insufficient stock"));
    }

    #[test]
    fn test_anyhow_without_sqlx_is_internal() {
        let error: PharmyError = anyhow::anyhow!("boom").into();
        assert_eq!(error.error_code(), "INTERNAL_SERVER_ERROR");
    }

    #[test]
    fn test_stock_errors_surface_as_validation() {
        let error: PharmyError = anyhow::Error::new(pharmy_models::StockError::Insufficient {
            product: "Paracetamol".to_string(),
            requested: 5,
            available: 2,
        })
        .context("Failed to create sale")
        .into();
        assert_eq!(error.http_status_code(), 400);
        assert!(error.to_string().contains("available 2"));
    }

    #[test]
    fn test_batch_date_errors_name_their_field() {
        let error: PharmyError = anyhow::Error::new(pharmy_models::BatchDateError::ManufacturedAfterExpiry)
            .context("Failed to update batch")
            .into();
        assert_eq!(error.http_status_code(), 400);
        assert!(error.to_string().contains("mfg_date"));
    }

    #[test]
    fn test_row_not_found_is_404() {
        let error: PharmyError = sqlx::Error::RowNotFound.into();
        assert_eq!(error.http_status_code(), 404);
    }
}
