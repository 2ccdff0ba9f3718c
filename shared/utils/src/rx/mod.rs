//! Prescription text extraction: OCR client and medicine parser.

pub mod ocr;
pub mod parser;

pub use ocr::{OcrClient, OcrResult, MOCK_PRESCRIPTION_TEXT};
pub use parser::{ExtractedMedicine, MedicineParser};
