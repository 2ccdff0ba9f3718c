use crate::error::{PharmyError, PharmyResult};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use validator::{Validate, ValidationErrors};

static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9\s\-()]{8,18}[0-9]$").expect("valid phone regex"));

static SKU_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-_./]*$").expect("valid sku regex"));

pub fn validate_model<T: Validate>(model: &T) -> PharmyResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let field = first_invalid_field(&errors).unwrap_or_else(|| "model".to_string());
            Err(PharmyError::validation(field, format_validation_errors(&errors)))
        }
    }
}

fn first_invalid_field(errors: &ValidationErrors) -> Option<String> {
    let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
    fields.sort_unstable();
    fields.first().map(|f| f.to_string())
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    let mut field_errors: Vec<_> = errors.field_errors().into_iter().collect();
    field_errors.sort_by_key(|(field, _)| *field);

    for (field, field_errors) in field_errors {
        for error in field_errors {
            if let Some(message) = &error.message {
                messages.push(message.to_string());
                continue;
            }
            let message = match error.code.as_ref() {
                "email" => format!("Invalid email format for field '{}'", field),
                "length" => format!("Length validation failed for field '{}'", field),
                "range" => format!("Value out of range for field '{}'", field),
                "required" => format!("Field '{}' is required", field),
                code => format!("Validation failed for field '{}': {}", field, code),
            };
            messages.push(message);
        }
    }

    messages.join(", ")
}

/// Used as a `#[validate(custom = ...)]` hook by request payloads.
pub fn validate_phone(phone: &str) -> Result<(), validator::ValidationError> {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if PHONE_REGEX.is_match(phone) && (10..=15).contains(&digits) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("phone"))
    }
}

pub fn validate_sku(sku: &str) -> Result<(), validator::ValidationError> {
    if SKU_REGEX.is_match(sku) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("sku"))
    }
}

/// At least eight characters with one uppercase letter and one digit.
pub fn validate_password_strength(password: &str) -> Result<(), validator::ValidationError> {
    let long_enough = password.chars().count() >= 8;
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if long_enough && has_upper && has_digit {
        Ok(())
    } else {
        let mut error = validator::ValidationError::new("password_strength");
        error.message = Some(
            "Password must be at least 8 characters with one uppercase letter and one number".into(),
        );
        Err(error)
    }
}

pub fn validate_file_type(file_name: &str, allowed_types: &[&str]) -> PharmyResult<()> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    if !allowed_types.contains(&extension.to_lowercase().as_str()) {
        return Err(PharmyError::validation(
            "file_type",
            format!(
                "File type '{}' not allowed. Allowed types: {}",
                extension,
                allowed_types.join(", ")
            ),
        ));
    }

    Ok(())
}

pub fn validate_file_size(file_size: u64, max_size: u64) -> PharmyResult<()> {
    if file_size == 0 {
        return Err(PharmyError::validation("file", "File is empty"));
    }
    if file_size > max_size {
        return Err(PharmyError::validation(
            "file_size",
            format!(
                "File size {} bytes exceeds maximum allowed size {} bytes",
                file_size, max_size
            ),
        ));
    }

    Ok(())
}

/// Keeps only characters that are safe inside a storage path segment.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = std::path::Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn validate_date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> PharmyResult<()> {
    if start > end {
        return Err(PharmyError::validation(
            "date_range",
            "Start date must not be after end date",
        ));
    }

    Ok(())
}

/// Start of day for a `from` filter.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Inclusive end of day for a `to` filter.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Payload {
        #[validate(length(min = 2, max = 10, message = "Name must be between 2 and 10 characters"))]
        name: String,
        #[validate(email)]
        email: String,
    }

    #[test]
    fn test_validate_model_uses_custom_message() {
        let payload = Payload {
            name: "x".to_string(),
            email: "someone@example.com".to_string(),
        };
        let err = validate_model(&payload).unwrap_err();
        match err {
            PharmyError::Validation { field, message } => {
                assert_eq!(field, "name");
                assert!(message.contains("between 2 and 10"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+91 98765 43210").is_ok());
        assert!(validate_phone("9876543210").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("call-me-maybe").is_err());
    }

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("PARA-500").is_ok());
        assert!(validate_sku("-bad").is_err());
        assert!(validate_sku("has space").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Pharmacy2024").is_ok());
        assert!(validate_password_strength("Short1A").is_err());
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("NoDigitsHere").is_err());
    }

    #[test]
    fn test_validate_file_type() {
        let allowed = &["jpg", "jpeg", "png", "pdf"];
        assert!(validate_file_type("scan.PDF", allowed).is_ok());
        assert!(validate_file_type("notes.txt", allowed).is_err());
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(0, 100).is_err());
        assert!(validate_file_size(100, 100).is_ok());
        assert!(validate_file_size(101, 100).is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my scan (1).png"), "my_scan__1_.png");
        assert_eq!(sanitize_file_name(".."), "upload");
    }

    #[test]
    fn test_end_of_day_is_inclusive() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(end_of_day(date) > start_of_day(date));
        assert_eq!(end_of_day(date).date_naive(), date);
    }
}
