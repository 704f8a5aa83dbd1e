//! External proposal source: given a raw value, a field and the field's
//! reference vocabulary, produce a candidate canonical value and a
//! confidence score.

pub mod mock;
pub mod openai;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// A candidate normalization from the proposal source.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub normalized_value: String,
    pub confidence_score: f64,
}

#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("proposal request failed: {0}")]
    Http(String),
    #[error("malformed proposal response: {0}")]
    Shape(String),
}

/// A source of normalization proposals.
///
/// Responses are untrusted text; [`parse_proposal`] validates the shape
/// before anything downstream sees it.
pub trait Proposer: Send + Sync {
    /// The canonical name of this source (e.g. "openai").
    fn name(&self) -> &str;

    fn propose<'a>(
        &'a self,
        field: &'a str,
        raw_value: &'a str,
        vocabulary: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Proposal, ProposalError>> + Send + 'a>>;
}

/// Validate an untrusted `{normalized_value, confidence_score}` JSON object.
///
/// The value must be a non-empty string and the score a finite number in
/// `[0, 1]`; anything else is a shape error.
pub fn parse_proposal(value: &serde_json::Value) -> Result<Proposal, ProposalError> {
    let normalized_value = value["normalized_value"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProposalError::Shape("missing or empty normalized_value".to_string()))?;

    let confidence_score = value["confidence_score"]
        .as_f64()
        .ok_or_else(|| ProposalError::Shape("missing confidence_score".to_string()))?;
    if !confidence_score.is_finite() || !(0.0..=1.0).contains(&confidence_score) {
        return Err(ProposalError::Shape(format!(
            "confidence_score {confidence_score} outside [0, 1]"
        )));
    }

    Ok(Proposal {
        normalized_value: normalized_value.to_string(),
        confidence_score,
    })
}
