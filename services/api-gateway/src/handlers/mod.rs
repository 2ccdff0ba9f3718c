pub mod alerts;
pub mod audit;
pub mod auth;
pub mod batches;
pub mod health;
pub mod inventory;
pub mod prescriptions;
pub mod products;
pub mod reports;
pub mod sales;
pub mod subscription;
pub mod suppliers;
pub mod users;

use serde_json::json;

use pharmy_database::AuditRepository;
use pharmy_models::AuditEntry;
use pharmy_utils::{PharmyError, PharmyResult};

use crate::AppState;

/// Appends to the tenant's audit chain. The audited change is already
/// committed, so a failed append is logged rather than returned.
pub(crate) async fn record_audit(state: &AppState, entry: AuditEntry) {
    let action = entry.action.as_str();
    let entity_id = entry.entity_id;
    if let Err(err) = AuditRepository::new(state.pool.clone()).append(entry).await {
        tracing::error!(error = %err, action, entity_id = %entity_id, "Failed to append audit entry");
    }
}

/// Parses an optional enum-valued query or body field, naming the field on failure.
pub(crate) fn parse_field<T>(
    value: Option<&str>,
    field: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> PharmyResult<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse(raw)
            .map(Some)
            .ok_or_else(|| PharmyError::validation(field, format!("Invalid {}: {}", field, raw))),
    }
}

/// Blank search terms behave as no search.
pub(crate) fn search_term(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub(crate) fn deleted(resource: &str) -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "message": format!("{} deleted successfully", resource) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmy_models::ProductCategory;

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field(None, "category", ProductCategory::from_str).unwrap(), None);
        assert_eq!(parse_field(Some("  "), "category", ProductCategory::from_str).unwrap(), None);
        assert_eq!(
            parse_field(Some("otc"), "category", ProductCategory::from_str).unwrap(),
            Some(ProductCategory::Otc)
        );

        let err = parse_field(Some("candy"), "category", ProductCategory::from_str).unwrap_err();
        assert_eq!(err.http_status_code(), 400);
    }

    #[test]
    fn test_search_term() {
        assert_eq!(search_term(Some("  para ".to_string())), Some("para".to_string()));
        assert_eq!(search_term(Some("   ".to_string())), None);
        assert_eq!(search_term(None), None);
    }
}
