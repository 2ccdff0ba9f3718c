pub mod config;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod rx;
pub mod security;
pub mod validation;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use security::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_loading() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.inventory.expiry_warning_days, 30);
    }

    #[test]
    fn test_error_handling() {
        let error = PharmyError::validation("sku", "SKU must be between 3 and 50 characters");
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
        assert_eq!(error.http_status_code(), 400);
    }

    #[test]
    fn test_token_service_from_config() {
        let config = AppConfig::default();
        let tokens = TokenService::from_config(&config.auth);
        assert_eq!(tokens.access_ttl().num_minutes(), 15);
        assert_eq!(tokens.refresh_ttl().num_days(), 7);
    }
}
