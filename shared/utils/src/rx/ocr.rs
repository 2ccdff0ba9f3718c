//! OCR client
//!
//! Sends prescription images to an HTTP OCR service and parses the returned
//! text into medicines.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parser::{ExtractedMedicine, MedicineParser};
use crate::config::UploadConfig;

/// Canned result returned when the mock backend is enabled.
pub const MOCK_PRESCRIPTION_TEXT: &str = "Rx\n\n1. Paracetamol 500mg - Take 1 tablet twice daily after meals x 10 tablets\n2. Amoxicillin 250mg - Take 1 capsule three times daily x 15 capsules\n\nDr. John Smith\nLicense: MD12345";
const MOCK_CONFIDENCE: f64 = 0.87;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub extracted_text: String,
    pub confidence: f64,
    pub medicines: Vec<ExtractedMedicine>,
}

#[derive(Debug, Clone)]
enum OcrBackend {
    Http {
        client: Client,
        url: String,
        api_key: Option<String>,
    },
    Mock,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct OcrClient {
    backend: OcrBackend,
    parser: MedicineParser,
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    file_name: &'a str,
    content_type: &'a str,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl OcrClient {
    /// Prefers a configured service URL, then the mock, else disabled.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        let backend = match &config.ocr_api_url {
            Some(url) if !url.trim().is_empty() => {
                let client = Client::builder()
                    .timeout(Duration::from_secs(config.ocr_timeout_seconds))
                    .build()
                    .context("Failed to create OCR HTTP client")?;
                OcrBackend::Http {
                    client,
                    url: url.clone(),
                    api_key: config.ocr_api_key.clone(),
                }
            }
            _ if config.mock_ocr => OcrBackend::Mock,
            _ => OcrBackend::Disabled,
        };
        Ok(Self {
            backend,
            parser: MedicineParser::new(),
        })
    }

    pub fn mock() -> Self {
        Self {
            backend: OcrBackend::Mock,
            parser: MedicineParser::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, OcrBackend::Disabled)
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.backend, OcrBackend::Mock)
    }

    /// `Ok(None)` when no backend is configured.
    pub async fn extract(&self, file_name: &str, content_type: &str, data: &[u8]) -> Result<Option<OcrResult>> {
        let (text, confidence) = match &self.backend {
            OcrBackend::Disabled => return Ok(None),
            OcrBackend::Mock => (MOCK_PRESCRIPTION_TEXT.to_string(), MOCK_CONFIDENCE),
            OcrBackend::Http { client, url, api_key } => {
                let request = OcrRequest {
                    file_name,
                    content_type,
                    image_base64: BASE64.encode(data),
                };
                let mut builder = client.post(url).json(&request);
                if let Some(key) = api_key {
                    builder = builder.header("Authorization", format!("Bearer {}", key));
                }
                let response = builder.send().await.context("Failed to call OCR service")?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("OCR service returned {}: {}", status, body);
                }

                let body: OcrResponse = response
                    .json()
                    .await
                    .context("Failed to parse OCR response")?;
                (body.text, body.confidence)
            }
        };

        Ok(Some(OcrResult {
            medicines: self.parser.parse(&text),
            extracted_text: text,
            confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_mock_backend_returns_canned_prescription() {
        let client = OcrClient::mock();
        let result = client.extract("rx.png", "image/png", b"png").await.unwrap().unwrap();
        assert_eq!(result.confidence, 0.87);
        let names: Vec<&str> = result.medicines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Paracetamol", "Amoxicillin"]);
    }

    #[tokio::test]
    async fn test_disabled_backend_skips_extraction() {
        let mut config = AppConfig::default().uploads;
        config.mock_ocr = false;
        config.ocr_api_url = None;
        let client = OcrClient::from_config(&config).unwrap();
        assert!(!client.is_enabled());
        assert!(client.extract("rx.png", "image/png", b"png").await.unwrap().is_none());
    }

    #[test]
    fn test_service_url_wins_over_mock() {
        let mut config = AppConfig::default().uploads;
        config.mock_ocr = true;
        config.ocr_api_url = Some("http://localhost:9999/ocr".to_string());
        let client = OcrClient::from_config(&config).unwrap();
        assert!(client.is_enabled());
        assert!(!client.is_mock());
    }
}
