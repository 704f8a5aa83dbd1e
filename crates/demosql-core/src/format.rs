//! Pattern-table canonicalization of already-produced category predictions.
//!
//! Unlike the cache-backed engine, these rules are fixed: for each known
//! prediction category an ordered list of case-insensitive patterns is tried
//! and the first match wins. Free text that matches nothing is replaced by
//! the category's default placeholder, since the downstream columns enforce
//! length and enumeration constraints.

use once_cell::sync::Lazy;
use regex::Regex;

struct CategoryRules {
    category: &'static str,
    rules: Vec<(Regex, &'static str)>,
    default: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> (Regex, &'static str) {
    // (?i) keeps the tables readable; patterns are static so unwrap is safe
    // at first use.
    (Regex::new(&format!("(?i){pattern}")).unwrap(), replacement)
}

static CATEGORY_RULES: Lazy<Vec<CategoryRules>> = Lazy::new(|| {
    vec![
        CategoryRules {
            category: "employment_opportunities",
            rules: vec![
                rule(r"full[\s-]?time", "Full-time"),
                rule(r"part[\s-]?time", "Part-time"),
                rule(r"self[\s-]?employed|freelance|gig\b", "Self-employed"),
                rule(r"unemploy|jobless", "Unemployed"),
                rule(r"retir", "Retired"),
                rule(r"student", "Student"),
            ],
            default: "Employed",
        },
        CategoryRules {
            category: "income_potential",
            rules: vec![
                rule(r"upper[\s-]?middle", "Upper-middle"),
                rule(r"lower[\s-]?middle", "Lower-middle"),
                rule(r"high|affluent|wealthy|six[\s-]?figure", "High"),
                rule(r"low\b|poverty|minimum[\s-]?wage", "Low"),
                rule(r"middle|moderate|average|median", "Middle"),
            ],
            default: "Middle",
        },
        CategoryRules {
            category: "education_options",
            rules: vec![
                rule(r"graduate|master|doctora|phd", "Graduate degree"),
                rule(r"associate|community college", "Associate degree"),
                rule(r"bachelor|universit|undergrad|college", "Bachelor's degree"),
                rule(r"high school|secondary|\bged\b", "High school"),
                rule(r"vocational|trade school|apprentice", "Vocational training"),
            ],
            default: "Some college",
        },
        CategoryRules {
            category: "health_and_wellness",
            rules: vec![
                rule(r"excellent|very good", "Excellent"),
                rule(r"good|healthy|active lifestyle", "Good"),
                rule(r"fair|average|moderate|mixed", "Fair"),
                rule(r"poor|at[\s-]?risk|concern|limited access", "Poor"),
            ],
            default: "Fair",
        },
        CategoryRules {
            category: "crime_and_safety",
            rules: vec![
                rule(r"high crime|dangerous|unsafe|elevated", "High"),
                rule(r"low crime|very safe|\bsafe\b", "Low"),
                rule(r"moderate|average|mixed|some crime", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "environmental_factors",
            rules: vec![
                rule(r"excellent|clean|pristine|green|good air", "Good"),
                rule(r"poor|pollut|smog|contaminat", "Poor"),
                rule(r"moderate|mixed|average|fair", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "cultural_diversity",
            rules: vec![
                rule(r"very diverse|highly diverse|rich|multicultural|diverse", "High"),
                rule(r"homogeneous|limited|low diversity|little", "Low"),
                rule(r"moderate|some diversity|growing", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "transportation",
            rules: vec![
                rule(r"public trans|transit|subway|metro|\bbus\b|light rail", "Public transit"),
                rule(r"walk|bike|bicycl|pedestrian", "Walkable"),
                rule(r"car[\s-]?dependent|driv|vehicle|highway", "Car-dependent"),
                rule(r"mixed|multimodal|varied", "Mixed"),
            ],
            default: "Mixed",
        },
        CategoryRules {
            category: "housing_market",
            rules: vec![
                rule(r"expensive|high[\s-]?cost|unafford|competitive|hot market", "Expensive"),
                rule(r"afford|low[\s-]?cost|cheap|buyer", "Affordable"),
                rule(r"moderate|average|stable|balanced", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "technology_access",
            rules: vec![
                rule(r"excellent|high[\s-]?speed|fiber|broadband|widespread", "High"),
                rule(r"limited|poor|slow|underserved|rural gap", "Low"),
                rule(r"moderate|average|adequate|improving", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "social_life",
            rules: vec![
                rule(r"vibrant|active|lively|bustling|rich social", "Active"),
                rule(r"quiet|limited|sparse|isolat", "Quiet"),
                rule(r"moderate|average|balanced", "Moderate"),
            ],
            default: "Moderate",
        },
        CategoryRules {
            category: "economic_outlook",
            rules: vec![
                rule(r"grow|boom|strong|thriv|expand|positive", "Growing"),
                rule(r"declin|shrink|weak|recess|negative|downturn", "Declining"),
                rule(r"stable|steady|flat|moderate", "Stable"),
            ],
            default: "Stable",
        },
    ]
});

/// Canonicalize a category prediction.
///
/// For a known category the first matching rule wins; no match substitutes
/// the category default. Unknown categories pass the trimmed text through
/// with a warning (nothing downstream constrains them).
pub fn canonicalize(category: &str, prediction: &str) -> String {
    let Some(rules) = CATEGORY_RULES.iter().find(|r| r.category == category) else {
        tracing::warn!(category, "no canonicalization rules for category");
        return prediction.trim().to_string();
    };
    for (pattern, replacement) in &rules.rules {
        if pattern.is_match(prediction) {
            return (*replacement).to_string();
        }
    }
    tracing::debug!(
        category,
        prediction,
        default = rules.default,
        "prediction matched no rule, using category default"
    );
    rules.default.to_string()
}

/// Whether canonicalization rules exist for a category.
pub fn known_category(category: &str) -> bool {
    CATEGORY_RULES.iter().any(|r| r.category == category)
}

/// Coarse confidence bucket for report output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map free-text or numeric confidence to a bucket.
///
/// Numbers in [0, 1]: High ≥ 0.8, Medium ≥ 0.5, else Low. Text goes through
/// a synonym table. Anything unrecognized defaults to Medium with a logged
/// warning rather than being dropped.
pub fn canonicalize_confidence(text: &str) -> ConfidenceLevel {
    let trimmed = text.trim();
    if let Ok(score) = trimmed.parse::<f64>()
        && (0.0..=1.0).contains(&score)
    {
        return if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };
    }

    let folded = trimmed.to_lowercase();
    match folded.as_str() {
        "high" | "very high" | "certain" | "strong" | "confident" | "very likely" => {
            ConfidenceLevel::High
        }
        "medium" | "moderate" | "likely" | "probable" | "possible" => ConfidenceLevel::Medium,
        "low" | "very low" | "weak" | "unlikely" | "uncertain" | "speculative" => {
            ConfidenceLevel::Low
        }
        _ => {
            tracing::warn!(text = trimmed, "unrecognized confidence, defaulting to Medium");
            ConfidenceLevel::Medium
        }
    }
}

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(18|19|20)\d{2}\b").unwrap());

/// Append `(year)` to any source string that carries no 4-digit year.
pub fn canonicalize_sources(sources: &[String], fallback_year: i32) -> Vec<String> {
    sources
        .iter()
        .map(|s| {
            let trimmed = s.trim();
            if YEAR_RE.is_match(trimmed) {
                trimmed.to_string()
            } else {
                format!("{trimmed} ({fallback_year})")
            }
        })
        .collect()
}
