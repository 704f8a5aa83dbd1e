//! Cache-first normalization pipeline.

use std::sync::Arc;

use crate::approval::{Adjudicator, ApprovalPolicy};
use crate::cache::{CacheEntry, NormCache};
use crate::key::CacheKey;
use crate::proposer::{Proposal, ProposalError, Proposer};
use crate::stats::RunStats;
use crate::GENDER_TERMS;

/// Normalizes raw field values against the cache, falling back to the
/// external proposal source and the approval workflow on a miss.
///
/// Calls for the same key are expected to be serialized by the caller;
/// writes are last-write-wins.
pub struct Normalizer {
    cache: Arc<NormCache>,
    proposer: Arc<dyn Proposer>,
    policy: ApprovalPolicy,
    stats: Arc<RunStats>,
}

impl Normalizer {
    pub fn new(
        cache: Arc<NormCache>,
        proposer: Arc<dyn Proposer>,
        policy: ApprovalPolicy,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            cache,
            proposer,
            policy,
            stats,
        }
    }

    /// Normalize one raw value.
    ///
    /// A live cache hit returns immediately without touching the proposal
    /// source. On a miss the proposal is validated, run through the approval
    /// policy, written back to the cache and recorded in the run statistics.
    ///
    /// Never fails: an unusable proposal response degrades to
    /// `(raw_value, 0.0)` with nothing written to the cache, and a cache
    /// write failure degrades to "not cached".
    pub async fn normalize(
        &self,
        raw_value: &str,
        field: &str,
        vocabulary: &[String],
        adjudicator: &dyn Adjudicator,
    ) -> (String, f64) {
        let key = CacheKey::derive(raw_value, field);

        if let Some(entry) = self.cache.get(&key) {
            tracing::debug!(field, raw_value, normalized = %entry.normalized_value, "cache hit");
            self.stats.record_hit();
            return (entry.normalized_value, entry.confidence_score);
        }

        self.stats.record_proposal_call();
        let proposal = match self.proposer.propose(field, raw_value, vocabulary).await {
            Ok(proposal) => proposal,
            Err(e) => {
                tracing::warn!(field, raw_value, error = %e, "proposal failed, keeping raw value");
                self.stats.record_fallback();
                return (raw_value.to_string(), 0.0);
            }
        };
        let proposal = match validate_proposal(field, proposal) {
            Ok(proposal) => proposal,
            Err(e) => {
                tracing::warn!(field, raw_value, error = %e, "invalid proposal, keeping raw value");
                self.stats.record_fallback();
                return (raw_value.to_string(), 0.0);
            }
        };

        let (final_value, tag) = self.policy.decide(
            raw_value,
            &proposal.normalized_value,
            proposal.confidence_score,
            adjudicator,
        );

        let entry = CacheEntry::new(final_value.clone(), proposal.confidence_score, tag);
        if let Err(e) = self.cache.put(&key, field, raw_value, &entry) {
            tracing::warn!(field, raw_value, error = %e, "cache write failed, continuing uncached");
        }
        self.stats
            .record_decision(field, &final_value, proposal.confidence_score, tag);
        tracing::info!(
            field,
            raw_value,
            normalized = %final_value,
            confidence = proposal.confidence_score,
            tag = %tag,
            "normalized"
        );

        (final_value, proposal.confidence_score)
    }
}

/// Enforce the documented canonicalization contract on a proposal.
///
/// Gender values must come from the fixed enumeration; the folded form is
/// used as the value.
fn validate_proposal(field: &str, proposal: Proposal) -> Result<Proposal, ProposalError> {
    if field.eq_ignore_ascii_case("gender") {
        let folded = proposal.normalized_value.trim().to_lowercase();
        if !GENDER_TERMS.contains(&folded.as_str()) {
            return Err(ProposalError::Shape(format!(
                "gender value {:?} outside the allowed set",
                proposal.normalized_value
            )));
        }
        return Ok(Proposal {
            normalized_value: folded,
            confidence_score: proposal.confidence_score,
        });
    }
    Ok(proposal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_outside_enumeration_is_rejected() {
        let proposal = Proposal {
            normalized_value: "woman".to_string(),
            confidence_score: 0.9,
        };
        assert!(validate_proposal("gender", proposal).is_err());
    }

    #[test]
    fn gender_is_folded_to_lowercase() {
        let proposal = Proposal {
            normalized_value: " Female ".to_string(),
            confidence_score: 0.9,
        };
        let validated = validate_proposal("gender", proposal).unwrap();
        assert_eq!(validated.normalized_value, "female");
    }

    #[test]
    fn other_fields_pass_through() {
        let proposal = Proposal {
            normalized_value: "Washington, DC".to_string(),
            confidence_score: 0.6,
        };
        let validated = validate_proposal("location", proposal).unwrap();
        assert_eq!(validated.normalized_value, "Washington, DC");
    }
}
