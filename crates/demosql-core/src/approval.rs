//! Confidence-gated approval of proposed normalizations.

use crate::ApprovalTag;

/// Confidence at or above this auto-accepts a proposal without consulting
/// the adjudicator.
///
/// Tunable trade-off: raising it sends more proposals to review; lowering it
/// auto-accepts more. Note that the proposal source's documented confidence
/// scale only reaches 0.9 for near-duplicates of existing vocabulary, so at
/// the default brand-new values always go through review.
pub const AUTO_APPROVE_THRESHOLD: f64 = 0.9;

/// What the adjudicator decided about one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Use the proposed value as-is.
    Accept,
    /// Keep the raw value unchanged.
    Reject,
    /// Use this value instead of the proposal.
    Replace(String),
}

/// Synchronous decision callback for proposals below the auto-approve
/// threshold. The CLI implements this as a console prompt; tests use
/// scripted doubles; an accept-everything policy covers unattended runs.
pub trait Adjudicator {
    fn decide(&self, raw_value: &str, proposed_value: &str, confidence: f64) -> Verdict;
}

/// Accepts every proposal. For unattended batch runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Adjudicator for AcceptAll {
    fn decide(&self, _raw_value: &str, _proposed_value: &str, _confidence: f64) -> Verdict {
        Verdict::Accept
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ApprovalPolicy {
    pub auto_approve_threshold: f64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_threshold: AUTO_APPROVE_THRESHOLD,
        }
    }
}

impl ApprovalPolicy {
    pub fn new(auto_approve_threshold: f64) -> Self {
        Self {
            auto_approve_threshold,
        }
    }

    /// Decide the final value for a proposal.
    ///
    /// At or above the threshold the proposal is accepted without an
    /// adjudicator round-trip. Below it, the adjudicator picks: accept the
    /// proposal, reject it (the raw value is kept unchanged), or supply a
    /// replacement.
    pub fn decide(
        &self,
        raw_value: &str,
        proposed_value: &str,
        confidence: f64,
        adjudicator: &dyn Adjudicator,
    ) -> (String, ApprovalTag) {
        if confidence >= self.auto_approve_threshold {
            tracing::debug!(raw_value, proposed_value, confidence, "auto-approved");
            return (proposed_value.to_string(), ApprovalTag::AutoApproved);
        }
        match adjudicator.decide(raw_value, proposed_value, confidence) {
            Verdict::Accept => (proposed_value.to_string(), ApprovalTag::UserApproved),
            Verdict::Reject => {
                tracing::info!(raw_value, proposed_value, "proposal rejected, keeping raw value");
                (raw_value.to_string(), ApprovalTag::Rejected)
            }
            Verdict::Replace(value) => (value, ApprovalTag::UserApproved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted adjudicator that returns a fixed verdict and counts calls.
    pub(crate) struct Scripted {
        verdict: Verdict,
        calls: AtomicUsize,
    }

    impl Scripted {
        pub(crate) fn new(verdict: Verdict) -> Self {
            Self {
                verdict,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Adjudicator for Scripted {
        fn decide(&self, _raw: &str, _proposed: &str, _confidence: f64) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    #[test]
    fn high_confidence_auto_approves_without_adjudicator() {
        let policy = ApprovalPolicy::default();
        let adj = Scripted::new(Verdict::Reject);
        let (value, tag) = policy.decide("washington dc", "Washington, DC", 0.95, &adj);
        assert_eq!(value, "Washington, DC");
        assert_eq!(tag, ApprovalTag::AutoApproved);
        assert_eq!(adj.calls(), 0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let policy = ApprovalPolicy::default();
        let adj = Scripted::new(Verdict::Reject);
        let (_, tag) = policy.decide("x", "X", 0.9, &adj);
        assert_eq!(tag, ApprovalTag::AutoApproved);
        assert_eq!(adj.calls(), 0);
    }

    #[test]
    fn low_confidence_consults_adjudicator() {
        let policy = ApprovalPolicy::default();
        let adj = Scripted::new(Verdict::Accept);
        let (value, tag) = policy.decide("washington dc", "Washington, DC", 0.5, &adj);
        assert_eq!(value, "Washington, DC");
        assert_eq!(tag, ApprovalTag::UserApproved);
        assert_eq!(adj.calls(), 1);
    }

    #[test]
    fn reject_keeps_raw_value() {
        let policy = ApprovalPolicy::default();
        let adj = Scripted::new(Verdict::Reject);
        let (value, tag) = policy.decide("washington dc", "Washington, DC", 0.5, &adj);
        assert_eq!(value, "washington dc");
        assert_eq!(tag, ApprovalTag::Rejected);
    }

    #[test]
    fn replacement_wins_over_proposal() {
        let policy = ApprovalPolicy::default();
        let adj = Scripted::new(Verdict::Replace("Washington, D.C.".to_string()));
        let (value, tag) = policy.decide("washington dc", "Washington, DC", 0.5, &adj);
        assert_eq!(value, "Washington, D.C.");
        assert_eq!(tag, ApprovalTag::UserApproved);
    }

    #[test]
    fn custom_threshold_is_honored() {
        let policy = ApprovalPolicy::new(0.6);
        let adj = Scripted::new(Verdict::Reject);
        let (_, tag) = policy.decide("x", "X", 0.7, &adj);
        assert_eq!(tag, ApprovalTag::AutoApproved);
        let (_, tag) = policy.decide("x", "X", 0.5, &adj);
        assert_eq!(tag, ApprovalTag::Rejected);
        assert_eq!(adj.calls(), 1);
    }
}
