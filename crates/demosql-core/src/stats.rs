//! Process-lifetime normalization statistics.
//!
//! One [`RunStats`] is constructed per run and passed into the engine
//! explicitly; nothing here is global or persisted. Counters are running
//! aggregates so [`summary`](RunStats::summary) is O(fields), not O(history).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::ApprovalTag;

#[derive(Debug, Default)]
struct FieldAgg {
    total: u64,
    distinct: HashSet<String>,
    confidence_sum: f64,
    accepted: u64,
}

/// Running counters over normalization activity.
pub struct RunStats {
    started: Instant,
    total: AtomicU64,
    cache_hits: AtomicU64,
    proposal_calls: AtomicU64,
    proposal_failures: AtomicU64,
    auto_approvals: AtomicU64,
    manual_approvals: AtomicU64,
    rejections: AtomicU64,
    fields: Mutex<HashMap<String, FieldAgg>>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            proposal_calls: AtomicU64::new(0),
            proposal_failures: AtomicU64::new(0),
            auto_approvals: AtomicU64::new(0),
            manual_approvals: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            fields: Mutex::new(HashMap::new()),
        }
    }

    /// A normalization served straight from the cache.
    pub fn record_hit(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A round-trip to the external proposal source.
    pub fn record_proposal_call(&self) {
        self.proposal_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A normalization that fell back to the raw value because the proposal
    /// response was unusable.
    pub fn record_fallback(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.proposal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A completed normalization decision.
    pub fn record_decision(
        &self,
        field: &str,
        normalized_value: &str,
        confidence: f64,
        tag: ApprovalTag,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match tag {
            ApprovalTag::AutoApproved => self.auto_approvals.fetch_add(1, Ordering::Relaxed),
            ApprovalTag::UserApproved => self.manual_approvals.fetch_add(1, Ordering::Relaxed),
            ApprovalTag::Rejected => self.rejections.fetch_add(1, Ordering::Relaxed),
            // Review and bulk-edit provenance never comes out of the engine.
            ApprovalTag::ManualReview | ApprovalTag::BulkEdit => 0,
        };

        let mut fields = self.fields.lock().unwrap_or_else(|p| p.into_inner());
        let agg = fields.entry(field.to_string()).or_default();
        agg.total += 1;
        agg.distinct.insert(normalized_value.to_string());
        agg.confidence_sum += confidence;
        if tag != ApprovalTag::Rejected {
            agg.accepted += 1;
        }
    }

    /// O(fields) snapshot of the counters.
    pub fn summary(&self) -> StatsSummary {
        let fields = self.fields.lock().unwrap_or_else(|p| p.into_inner());
        let per_field = fields
            .iter()
            .map(|(name, agg)| {
                let mean_confidence = if agg.total == 0 {
                    0.0
                } else {
                    agg.confidence_sum / agg.total as f64
                };
                let approval_rate = if agg.total == 0 {
                    0.0
                } else {
                    agg.accepted as f64 / agg.total as f64
                };
                (
                    name.clone(),
                    FieldSummary {
                        total: agg.total,
                        distinct_values: agg.distinct.len(),
                        mean_confidence,
                        approval_rate,
                    },
                )
            })
            .collect();

        StatsSummary {
            total_normalizations: self.total.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            proposal_calls: self.proposal_calls.load(Ordering::Relaxed),
            proposal_failures: self.proposal_failures.load(Ordering::Relaxed),
            auto_approvals: self.auto_approvals.load(Ordering::Relaxed),
            manual_approvals: self.manual_approvals.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            duration_secs: self.started.elapsed().as_secs_f64(),
            fields: per_field,
        }
    }
}

/// Per-field aggregate snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub total: u64,
    pub distinct_values: usize,
    pub mean_confidence: f64,
    /// Fraction of this field's normalizations that were not rejected.
    pub approval_rate: f64,
}

/// Point-in-time snapshot of a run's counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_normalizations: u64,
    pub cache_hits: u64,
    pub proposal_calls: u64,
    pub proposal_failures: u64,
    pub auto_approvals: u64,
    pub manual_approvals: u64,
    pub rejections: u64,
    pub duration_secs: f64,
    pub fields: BTreeMap<String, FieldSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_has_zero_rates() {
        let stats = RunStats::new();
        let summary = stats.summary();
        assert_eq!(summary.total_normalizations, 0);
        assert!(summary.fields.is_empty());
    }

    #[test]
    fn decisions_update_field_aggregates() {
        let stats = RunStats::new();
        stats.record_decision("location", "Washington, DC", 0.6, ApprovalTag::UserApproved);
        stats.record_decision("location", "New York City", 0.9, ApprovalTag::AutoApproved);
        stats.record_decision("location", "Washington, DC", 1.0, ApprovalTag::AutoApproved);
        stats.record_decision("gender", "springfield", 0.3, ApprovalTag::Rejected);

        let summary = stats.summary();
        assert_eq!(summary.total_normalizations, 4);
        assert_eq!(summary.auto_approvals, 2);
        assert_eq!(summary.manual_approvals, 1);
        assert_eq!(summary.rejections, 1);

        let loc = &summary.fields["location"];
        assert_eq!(loc.total, 3);
        assert_eq!(loc.distinct_values, 2);
        assert!((loc.mean_confidence - (0.6 + 0.9 + 1.0) / 3.0).abs() < 1e-9);
        assert_eq!(loc.approval_rate, 1.0);

        let gender = &summary.fields["gender"];
        assert_eq!(gender.approval_rate, 0.0);
    }

    #[test]
    fn hits_and_fallbacks_count_toward_totals() {
        let stats = RunStats::new();
        stats.record_hit();
        stats.record_proposal_call();
        stats.record_fallback();
        let summary = stats.summary();
        assert_eq!(summary.total_normalizations, 2);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.proposal_calls, 1);
        assert_eq!(summary.proposal_failures, 1);
    }
}
