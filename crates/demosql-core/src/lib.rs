//! Normalization core for demographic prediction records.
//!
//! Free-text categorical values (locations, occupations, gender, ...) are
//! folded onto a growing vocabulary of previously accepted canonical values.
//! Adjudicated mappings live in a durable cache ([`NormCache`]) addressed by
//! a content hash of the raw value and its field; new mappings come from an
//! external proposal source ([`proposer::Proposer`]) and pass through a
//! confidence-gated approval step ([`ApprovalPolicy`]) before being written
//! back. Everything in here degrades soft: a cache or proposer fault never
//! stops the surrounding pipeline.

use serde::{Deserialize, Serialize};

pub mod admin;
pub mod approval;
pub mod cache;
pub mod config_file;
pub mod engine;
pub mod format;
pub mod key;
pub mod proposer;
pub mod stats;

// Re-export for convenience
pub use approval::{AUTO_APPROVE_THRESHOLD, Adjudicator, ApprovalPolicy, Verdict};
pub use cache::{CACHE_EXPIRY_DAYS, CacheEntry, CacheError, CachedRow, NormCache};
pub use engine::Normalizer;
pub use key::CacheKey;
pub use proposer::{Proposal, ProposalError, Proposer};
pub use stats::{RunStats, StatsSummary};

/// Provenance of a cached mapping: how its current value was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTag {
    AutoApproved,
    UserApproved,
    Rejected,
    ManualReview,
    BulkEdit,
}

impl ApprovalTag {
    /// Stable string form used in SQLite and CSV.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalTag::AutoApproved => "auto_approved",
            ApprovalTag::UserApproved => "user_approved",
            ApprovalTag::Rejected => "rejected",
            ApprovalTag::ManualReview => "manual_review",
            ApprovalTag::BulkEdit => "bulk_edit",
        }
    }

    /// Parse the stable string form. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_approved" => Some(ApprovalTag::AutoApproved),
            "user_approved" => Some(ApprovalTag::UserApproved),
            "rejected" => Some(ApprovalTag::Rejected),
            "manual_review" => Some(ApprovalTag::ManualReview),
            "bulk_edit" => Some(ApprovalTag::BulkEdit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of canonical gender values the proposal source must use.
pub const GENDER_TERMS: [&str; 4] = ["male", "female", "non-binary", "other"];
