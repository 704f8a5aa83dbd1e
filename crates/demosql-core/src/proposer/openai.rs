//! OpenAI-backed proposal source.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;

use super::{Proposal, ProposalError, Proposer, parse_proposal};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default chat model for normalization proposals.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Proposal source backed by the OpenAI chat completions API.
///
/// The prompt instructs the model to either match the raw value to an
/// existing vocabulary entry or mint a new standardized value, and to report
/// its confidence on a documented scale (1.0 exact match, 0.9 very similar,
/// 0.7 somewhat similar, 0.5 new value with high confidence, 0.3 new value
/// with low confidence).
pub struct OpenAiProposer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiProposer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Build the normalization prompt for one `(field, value)` pair.
fn build_prompt(field: &str, raw_value: &str, vocabulary: &[String]) -> String {
    let existing = serde_json::to_string_pretty(vocabulary).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are a data normalization expert. Your task is to either:\n\
         1. Match the input value to an existing value in the database, or\n\
         2. Create a new standardized value if no good match exists\n\
         \n\
         Field: {field}\n\
         Input value: {raw_value}\n\
         Existing values in database: {existing}\n\
         \n\
         Rules:\n\
         1. If the input value is very similar to an existing value, use the existing value\n\
         2. If the input value is significantly different, create a new standardized value\n\
         3. For locations, use full place names (e.g., \"washington dc\" not \"dc\")\n\
         4. For occupations, use full job titles (e.g., \"software developer\" not \"dev\")\n\
         5. For gender, use standard terms (\"male\", \"female\", \"non-binary\", \"other\")\n\
         6. Always return a single string value\n\
         \n\
         Return your response in JSON format with two fields:\n\
         1. \"normalized_value\": the normalized value\n\
         2. \"confidence_score\": a number between 0 and 1 indicating your confidence in the match\n\
            - 1.0: Exact match to existing value\n\
            - 0.9: Very similar to existing value\n\
            - 0.7: Somewhat similar to existing value\n\
            - 0.5: New value with high confidence\n\
            - 0.3: New value with low confidence"
    )
}

impl Proposer for OpenAiProposer {
    fn name(&self) -> &str {
        "openai"
    }

    fn propose<'a>(
        &'a self,
        field: &'a str,
        raw_value: &'a str,
        vocabulary: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Proposal, ProposalError>> + Send + 'a>> {
        Box::pin(async move {
            let body = json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You are a data normalization expert. Return only the JSON response."
                    },
                    {
                        "role": "user",
                        "content": build_prompt(field, raw_value, vocabulary)
                    }
                ],
                "temperature": 0.1,
                "response_format": {"type": "json_object"}
            });

            let resp = self
                .client
                .post(API_URL)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProposalError::Http(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() == 429 {
                return Err(ProposalError::Http("rate limited (429)".to_string()));
            }
            if !status.is_success() {
                return Err(ProposalError::Http(format!("HTTP {status}")));
            }

            let data: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| ProposalError::Http(e.to_string()))?;

            let content = data["choices"]
                .as_array()
                .and_then(|c| c.first())
                .and_then(|c| c["message"]["content"].as_str())
                .ok_or_else(|| ProposalError::Shape("response has no message content".to_string()))?;

            let parsed: serde_json::Value = serde_json::from_str(content)
                .map_err(|e| ProposalError::Shape(format!("content is not JSON: {e}")))?;

            let proposal = parse_proposal(&parsed)?;
            tracing::info!(
                field,
                raw_value,
                normalized = %proposal.normalized_value,
                confidence = proposal.confidence_score,
                "proposal received"
            );
            Ok(proposal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_field_value_and_vocabulary() {
        let vocab = vec!["Washington, DC".to_string(), "New York City".to_string()];
        let prompt = build_prompt("location", "washington dc", &vocab);
        assert!(prompt.contains("Field: location"));
        assert!(prompt.contains("Input value: washington dc"));
        assert!(prompt.contains("Washington, DC"));
        assert!(prompt.contains("New York City"));
    }

    #[test]
    fn prompt_documents_the_confidence_scale() {
        let prompt = build_prompt("occupation", "dev", &[]);
        assert!(prompt.contains("1.0: Exact match"));
        assert!(prompt.contains("0.5: New value with high confidence"));
    }

    #[test]
    fn response_content_parses_like_the_engine_expects() {
        // The content string a completion returns is itself JSON.
        let content = r#"{"normalized_value": "Software Developer", "confidence_score": 0.7}"#;
        let parsed: serde_json::Value = serde_json::from_str(content).unwrap();
        let proposal = parse_proposal(&parsed).unwrap();
        assert_eq!(proposal.normalized_value, "Software Developer");
        assert_eq!(proposal.confidence_score, 0.7);
    }
}
