//! Prescription Text Parser
//!
//! Pulls medicine lines out of OCR text. Every line is tried against the
//! dosage and pack-size patterns first; lines that only look like a medicine
//! fall back to a word-based name guess with lower confidence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PATTERN_CONFIDENCE: f64 = 0.8;
const FALLBACK_CONFIDENCE: f64 = 0.6;
const MIN_NAME_LEN: usize = 3;
const MAX_NAME_WORDS: usize = 3;
const MAX_MEDICINES: usize = 20;

static NAME_WITH_STRENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([A-Za-z]+(?:\s+[A-Za-z]+)*)\s+(\d+(?:\.\d+)?)\s*(mg|g|ml|mcg|iu)\b")
        .unwrap()
});

static NAME_WITH_PACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([A-Za-z]+(?:\s+[A-Za-z]+)*)\s+(\d+)\s*(tablet|tab|capsule|cap|syrup|ml)\b")
        .unwrap()
});

static STRENGTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(mg|g|ml|mcg|iu)\b").unwrap());

static WORD_WITH_STRENGTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z]{4,}\s+\d+(?:mg|g|ml|mcg)\b").unwrap());

static PACK_QUANTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:tablet|tab|capsule|cap|piece)").unwrap());

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s+").unwrap());

static STRENGTH_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+(?:mg|g|ml|mcg|iu|tablet|tab|cap)$").unwrap());

static INSTRUCTION_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:take|use|apply|morning|evening|daily)$").unwrap());

static INSTRUCTIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:take|use|apply)\s+([^,\n]+)",
        r"(?i)(\d+\s*times?\s*(?:a\s*|per\s*)?day)",
        r"(?i)(morning|afternoon|evening|night|bedtime)",
        r"(?i)(before|after)\s+(?:meal|food|eating)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const MEDICINE_KEYWORDS: &[&str] = &[
    "tablet",
    "tab",
    "capsule",
    "cap",
    "syrup",
    "injection",
    "cream",
    "ointment",
    "drops",
    "suspension",
    "mg",
    "g",
    "ml",
    "mcg",
    "iu",
];

/// Verbs the pack-size pattern tends to capture as a name ("Take 1 tablet").
const NOT_A_NAME: &[&str] = &["take", "use", "apply"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMedicine {
    pub name: String,
    pub dosage: Option<String>,
    pub quantity: Option<i32>,
    pub instructions: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MedicineParser;

impl MedicineParser {
    pub fn new() -> Self {
        Self
    }

    /// At most 20 medicines, highest confidence first, one per name.
    pub fn parse(&self, text: &str) -> Vec<ExtractedMedicine> {
        let mut found = Vec::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut matched = false;

            for pattern in [&*NAME_WITH_STRENGTH, &*NAME_WITH_PACK] {
                for caps in pattern.captures_iter(line) {
                    let name = caps[1].trim();
                    if name.len() < MIN_NAME_LEN || is_instruction_verb(name) {
                        continue;
                    }
                    found.push(ExtractedMedicine {
                        name: name.to_string(),
                        dosage: Some(format!("{}{}", &caps[2], &caps[3])),
                        quantity: extract_quantity(line),
                        instructions: extract_instructions(line),
                        confidence: PATTERN_CONFIDENCE,
                    });
                    matched = true;
                }
            }

            if !matched && looks_like_medicine(line) {
                let name = extract_name(line);
                if name.len() >= MIN_NAME_LEN {
                    found.push(ExtractedMedicine {
                        name,
                        dosage: extract_dosage(line),
                        quantity: extract_quantity(line),
                        instructions: extract_instructions(line),
                        confidence: FALLBACK_CONFIDENCE,
                    });
                }
            }
        }

        dedupe_and_rank(found)
    }
}

fn is_instruction_verb(name: &str) -> bool {
    NOT_A_NAME.iter().any(|v| name.eq_ignore_ascii_case(v))
}

fn looks_like_medicine(line: &str) -> bool {
    let lower = line.to_lowercase();
    MEDICINE_KEYWORDS.iter().any(|k| lower.contains(k)) || WORD_WITH_STRENGTH.is_match(line)
}

fn extract_name(line: &str) -> String {
    let mut words = Vec::new();
    for word in line.split_whitespace() {
        if STRENGTH_WORD.is_match(word) || INSTRUCTION_WORD.is_match(word) {
            break;
        }
        words.push(word);
        if words.len() >= MAX_NAME_WORDS {
            break;
        }
    }
    words.join(" ")
}

fn extract_dosage(line: &str) -> Option<String> {
    STRENGTH
        .captures(line)
        .map(|caps| format!("{}{}", &caps[1], &caps[2]))
}

fn extract_quantity(line: &str) -> Option<i32> {
    if let Some(caps) = PACK_QUANTITY.captures(line) {
        return caps[1].parse().ok();
    }
    LEADING_NUMBER
        .captures(line)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .filter(|n| (1..=1000).contains(n))
}

fn extract_instructions(line: &str) -> Option<String> {
    INSTRUCTIONS.iter().find_map(|pattern| {
        pattern.captures(line).map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default()
        })
    })
}

fn dedupe_and_rank(medicines: Vec<ExtractedMedicine>) -> Vec<ExtractedMedicine> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ExtractedMedicine> = Vec::new();

    for medicine in medicines {
        let key = medicine.name.trim().to_lowercase();
        match index.get(&key) {
            Some(&i) if medicine.confidence > unique[i].confidence => unique[i] = medicine,
            Some(_) => {}
            None => {
                index.insert(key, unique.len());
                unique.push(medicine);
            }
        }
    }

    unique.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    unique.truncate(MAX_MEDICINES);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_strength_lines() {
        let parser = MedicineParser::new();
        let medicines = parser.parse(
            "1. Paracetamol 500mg - Take 1 tablet twice daily after meals x 10 tablets\n\
             2. Amoxicillin 250mg - Take 1 capsule three times daily x 15 capsules",
        );

        let names: Vec<&str> = medicines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Paracetamol", "Amoxicillin"]);

        let para = &medicines[0];
        assert_eq!(para.dosage.as_deref(), Some("500mg"));
        assert_eq!(para.quantity, Some(1));
        assert_eq!(
            para.instructions.as_deref(),
            Some("1 tablet twice daily after meals x 10 tablets")
        );
        assert_eq!(para.confidence, 0.8);
    }

    #[test]
    fn test_pack_size_pattern() {
        let medicines = MedicineParser::new().parse("Cough Syrup 2 syrup at bedtime");
        assert_eq!(medicines.len(), 1);
        assert_eq!(medicines[0].name, "Cough Syrup");
        assert_eq!(medicines[0].dosage.as_deref(), Some("2syrup"));
        assert_eq!(medicines[0].instructions.as_deref(), Some("bedtime"));
    }

    #[test]
    fn test_fallback_extraction() {
        let medicines = MedicineParser::new().parse("Betadine ointment apply twice");
        assert_eq!(medicines.len(), 1);
        assert_eq!(medicines[0].name, "Betadine ointment");
        assert_eq!(medicines[0].confidence, 0.6);
        assert_eq!(medicines[0].instructions.as_deref(), Some("twice"));
    }

    #[test]
    fn test_non_medicine_lines_ignored() {
        let medicines = MedicineParser::new().parse("Rx\n\nDr. John Smith\nLicense: MD12345");
        assert!(medicines.is_empty());
    }

    #[test]
    fn test_short_names_skipped() {
        assert!(MedicineParser::new().parse("Zn 50mg").is_empty());
    }

    #[test]
    fn test_duplicates_keep_highest_confidence() {
        let medicines = MedicineParser::new().parse(
            "Cetirizine take at night\nCetirizine 10mg at night",
        );
        assert_eq!(medicines.len(), 1);
        assert_eq!(medicines[0].confidence, 0.8);
        assert_eq!(medicines[0].dosage.as_deref(), Some("10mg"));
    }

    #[test]
    fn test_leading_quantity() {
        assert_eq!(extract_quantity("30 Vitamin D3 sachets"), Some(30));
        assert_eq!(extract_quantity("5000 units"), None);
        assert_eq!(extract_quantity("2 capsules daily"), Some(2));
    }

    #[test]
    fn test_result_is_capped() {
        let text: String = (0u8..30)
            .map(|i| format!("Med{}{} 10mg\n", (b'a' + i / 26) as char, (b'a' + i % 26) as char))
            .collect();
        assert_eq!(MedicineParser::new().parse(&text).len(), 20);
    }
}
