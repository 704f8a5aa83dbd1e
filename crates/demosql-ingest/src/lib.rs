//! Parser for plain-text demographic analysis files.
//!
//! The format, as produced by the prediction generator:
//!
//! ```text
//! Demographic Analysis Results
//! ==============================
//! Input Data:
//! Age: 34
//! Occupation: High School Teacher
//! ...
//! ==============================
//! ## Location Analysis
//! Prediction: Urban, high cost of living
//! Explanation: ...
//! - Census Bureau 2020
//! ## Employment Opportunities
//! ...
//! ```
//!
//! Sections are separated by lines of `=` characters; predictions are
//! grouped under `## Category` headers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed analysis file: {0}")]
    Format(String),
}

/// The demographic input block of one analysis file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputData {
    pub age: Option<i64>,
    pub occupation: Option<String>,
    pub location: Option<String>,
    pub zip_code: Option<String>,
    pub gender: Option<String>,
}

/// One prediction section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prediction {
    pub prediction: String,
    pub explanation: Option<String>,
    pub confidence: Option<String>,
    pub sources: Vec<String>,
}

/// A fully parsed analysis file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFile {
    pub input: InputData,
    /// Keyed by category slug (e.g. `location_analysis`).
    pub predictions: BTreeMap<String, Prediction>,
}

/// Lowercase a section header into its category slug.
fn category_slug(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 10 && trimmed.chars().all(|c| c == '=')
}

/// Parse the contents of one analysis file.
///
/// The file must contain at least the input section; a missing predictions
/// section yields an empty prediction map.
pub fn parse_analysis(content: &str) -> Result<AnalysisFile, IngestError> {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if is_separator(line) {
            sections.push(std::mem::take(&mut current));
        } else {
            current.push(line);
        }
    }
    sections.push(current);

    // [preamble] [input data] [predictions...]; the preamble may be empty.
    let (input_lines, prediction_lines): (&[&str], &[&str]) = match sections.len() {
        0 | 1 => {
            return Err(IngestError::Format(
                "no section separators found".to_string(),
            ));
        }
        2 => (sections[1].as_slice(), &[]),
        _ => (sections[1].as_slice(), sections[2].as_slice()),
    };

    let input = parse_input(input_lines)?;
    let predictions = parse_predictions(prediction_lines);
    Ok(AnalysisFile { input, predictions })
}

fn parse_input(lines: &[&str]) -> Result<InputData, IngestError> {
    let mut input = InputData::default();
    let mut seen_any = false;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_lowercase().as_str() {
            "age" => {
                seen_any = true;
                match value.parse::<i64>() {
                    Ok(age) => input.age = Some(age),
                    Err(_) => {
                        return Err(IngestError::Format(format!("unparseable age {value:?}")));
                    }
                }
            }
            "occupation" => {
                seen_any = true;
                input.occupation = Some(value.to_string());
            }
            "location" => {
                seen_any = true;
                input.location = Some(value.to_string());
            }
            "zip code" | "zip_code" | "zip" => {
                seen_any = true;
                input.zip_code = Some(value.to_string());
            }
            "gender" => {
                seen_any = true;
                input.gender = Some(value.to_string());
            }
            // "Input Data:" header and anything unrecognized.
            _ => {}
        }
    }
    if !seen_any {
        return Err(IngestError::Format("input section has no fields".to_string()));
    }
    Ok(input)
}

fn parse_predictions(lines: &[&str]) -> BTreeMap<String, Prediction> {
    let mut predictions = BTreeMap::new();
    let mut current_category: Option<String> = None;
    let mut current = Prediction::default();

    let mut flush = |category: &mut Option<String>, pred: &mut Prediction,
                     out: &mut BTreeMap<String, Prediction>| {
        if let Some(category) = category.take() {
            if pred.prediction.is_empty() {
                tracing::warn!(category, "prediction section without a Prediction line, skipped");
            } else {
                out.insert(category, std::mem::take(pred));
            }
        }
        *pred = Prediction::default();
    };

    for line in lines {
        let line = line.trim();
        if let Some(header) = line.strip_prefix("## ") {
            flush(&mut current_category, &mut current, &mut predictions);
            current_category = Some(category_slug(header));
        } else if let Some(value) = line.strip_prefix("Prediction:") {
            current.prediction = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Explanation:") {
            current.explanation = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Confidence:") {
            current.confidence = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("- ") {
            current.sources.push(value.trim().to_string());
        }
    }
    flush(&mut current_category, &mut current, &mut predictions);
    predictions
}

/// Parse an analysis file from disk.
pub fn parse_file(path: &Path) -> Result<AnalysisFile, IngestError> {
    let content = std::fs::read_to_string(path)?;
    parse_analysis(&content)
}

/// Analysis files in a directory (`demographic_analysis_*.txt`), sorted.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            name.contains("demographic_analysis_") && name.ends_with(".txt")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Map a category slug to its `demographic_analysis` prediction column.
pub fn prediction_column(category: &str) -> Option<&'static str> {
    match category {
        "location_analysis" => Some("prediction_location"),
        "employment_opportunities" => Some("prediction_employment"),
        "income_potential" => Some("prediction_income"),
        "education_options" => Some("prediction_education"),
        "health_and_wellness" => Some("prediction_health"),
        "crime_and_safety" => Some("prediction_crime"),
        "environmental_factors" => Some("prediction_environment"),
        "cultural_diversity" => Some("prediction_culture"),
        "transportation" => Some("prediction_transportation"),
        "housing_market" => Some("prediction_housing"),
        "technology_access" => Some("prediction_technology"),
        "social_life" => Some("prediction_social"),
        "economic_outlook" => Some("prediction_economic"),
        _ => None,
    }
}
