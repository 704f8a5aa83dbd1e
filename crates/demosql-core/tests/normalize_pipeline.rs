//! End-to-end tests of the normalization pipeline: cache, proposer,
//! approval, statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use demosql_core::proposer::mock::{MockProposer, MockResponse};
use demosql_core::{
    Adjudicator, ApprovalPolicy, ApprovalTag, CACHE_EXPIRY_DAYS, CacheKey, NormCache, Normalizer,
    RunStats, Verdict,
};
use tempfile::TempDir;

struct Scripted {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Adjudicator for Scripted {
    fn decide(&self, _raw: &str, _proposed: &str, _confidence: f64) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone()
    }
}

fn normalizer(
    cache: Arc<NormCache>,
    proposer: Arc<MockProposer>,
    stats: Arc<RunStats>,
) -> Normalizer {
    Normalizer::new(cache, proposer, ApprovalPolicy::default(), stats)
}

#[tokio::test]
async fn washington_dc_scenario() {
    // Raw "washington dc", empty vocabulary, proposal at 0.6, adjudicator
    // accepts unchanged.
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("Washington, DC", 0.6)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache.clone(), proposer.clone(), stats.clone());
    let adj = Scripted::new(Verdict::Accept);

    let (value, confidence) = engine.normalize("washington dc", "location", &[], &adj).await;
    assert_eq!(value, "Washington, DC");
    assert_eq!(confidence, 0.6);
    assert_eq!(adj.calls(), 1);

    let entry = cache.get(&CacheKey::derive("washington dc", "location")).unwrap();
    assert_eq!(entry.normalized_value, "Washington, DC");
    assert_eq!(entry.approved_by, Some(ApprovalTag::UserApproved));
    assert_eq!(entry.review_count, 0);

    // Identical second call is served from the cache: no proposer call, no
    // adjudicator prompt, same result.
    let (value2, confidence2) = engine.normalize("washington dc", "location", &[], &adj).await;
    assert_eq!((value2, confidence2), (value, confidence));
    assert_eq!(proposer.call_count(), 1);
    assert_eq!(adj.calls(), 1);
}

#[tokio::test]
async fn warm_cache_is_idempotent_and_skips_the_proposer() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("Software Developer", 0.95)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache, proposer.clone(), stats.clone());
    let adj = Scripted::new(Verdict::Reject);

    let first = engine.normalize("dev", "occupation", &[], &adj).await;
    let second = engine.normalize("dev", "occupation", &[], &adj).await;
    // Key folding makes case/whitespace variants hit the same entry.
    let third = engine.normalize("  DEV ", "occupation", &[], &adj).await;

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(proposer.call_count(), 1);

    let summary = stats.summary();
    assert_eq!(summary.total_normalizations, 3);
    assert_eq!(summary.cache_hits, 2);
    assert_eq!(summary.proposal_calls, 1);
}

#[tokio::test]
async fn high_confidence_auto_approves() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("New York City", 0.95)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache.clone(), proposer, stats.clone());
    let adj = Scripted::new(Verdict::Reject);

    let (value, _) = engine.normalize("nyc", "location", &[], &adj).await;
    assert_eq!(value, "New York City");
    assert_eq!(adj.calls(), 0);

    let entry = cache.get(&CacheKey::derive("nyc", "location")).unwrap();
    assert_eq!(entry.approved_by, Some(ApprovalTag::AutoApproved));
    assert_eq!(stats.summary().auto_approvals, 1);
}

#[tokio::test]
async fn mid_confidence_consults_the_adjudicator() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("New York City", 0.5)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache, proposer, stats);
    let adj = Scripted::new(Verdict::Accept);

    engine.normalize("nyc", "location", &[], &adj).await;
    assert_eq!(adj.calls(), 1);
}

#[tokio::test]
async fn rejection_caches_the_raw_value() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("Springfield", 0.3)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache.clone(), proposer.clone(), stats.clone());
    let adj = Scripted::new(Verdict::Reject);

    let (value, _) = engine.normalize("spring field", "location", &[], &adj).await;
    assert_eq!(value, "spring field");

    let entry = cache.get(&CacheKey::derive("spring field", "location")).unwrap();
    assert_eq!(entry.normalized_value, "spring field");
    assert_eq!(entry.approved_by, Some(ApprovalTag::Rejected));

    // The remembered rejection short-circuits the next run.
    engine.normalize("spring field", "location", &[], &adj).await;
    assert_eq!(proposer.call_count(), 1);
    assert_eq!(stats.summary().rejections, 1);
}

#[tokio::test]
async fn malformed_proposal_degrades_to_raw_value_uncached() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::with_sequence(vec![
        MockResponse::Malformed("content is not JSON".to_string()),
        MockResponse::proposal("Washington, DC", 0.95),
    ]));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache.clone(), proposer.clone(), stats.clone());
    let adj = Scripted::new(Verdict::Accept);

    let (value, confidence) = engine.normalize("washington dc", "location", &[], &adj).await;
    assert_eq!(value, "washington dc");
    assert_eq!(confidence, 0.0);
    // Nothing was cached, so the next call reaches the proposer again and
    // succeeds.
    assert!(cache.get(&CacheKey::derive("washington dc", "location")).is_none());

    let (value, confidence) = engine.normalize("washington dc", "location", &[], &adj).await;
    assert_eq!(value, "Washington, DC");
    assert_eq!(confidence, 0.95);
    assert_eq!(proposer.call_count(), 2);
    assert_eq!(stats.summary().proposal_failures, 1);
}

#[tokio::test]
async fn transport_error_degrades_to_raw_value() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::Error("timeout".to_string())));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache, proposer, stats);
    let adj = Scripted::new(Verdict::Accept);

    let (value, confidence) = engine.normalize("dev", "occupation", &[], &adj).await;
    assert_eq!((value.as_str(), confidence), ("dev", 0.0));
    assert_eq!(adj.calls(), 0);
}

#[tokio::test]
async fn gender_outside_enumeration_falls_back() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("woman", 0.95)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache.clone(), proposer, stats);
    let adj = Scripted::new(Verdict::Accept);

    let (value, confidence) = engine.normalize("F", "gender", &[], &adj).await;
    assert_eq!((value.as_str(), confidence), ("F", 0.0));
    assert!(cache.get(&CacheKey::derive("F", "gender")).is_none());
}

#[tokio::test]
async fn gender_within_enumeration_is_folded() {
    let cache = Arc::new(NormCache::new(CACHE_EXPIRY_DAYS));
    let proposer = Arc::new(MockProposer::new(MockResponse::proposal("Female", 0.95)));
    let stats = Arc::new(RunStats::new());
    let engine = normalizer(cache, proposer, stats);
    let adj = Scripted::new(Verdict::Accept);

    let (value, _) = engine.normalize("F", "gender", &[], &adj).await;
    assert_eq!(value, "female");
}

#[tokio::test]
async fn persistent_cache_survives_engine_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");

    {
        let cache = Arc::new(NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap());
        let proposer = Arc::new(MockProposer::new(MockResponse::proposal("Washington, DC", 0.6)));
        let engine = normalizer(cache, proposer, Arc::new(RunStats::new()));
        let adj = Scripted::new(Verdict::Accept);
        engine.normalize("washington dc", "location", &[], &adj).await;
    }

    // A fresh process over the same cache file serves the mapping without a
    // proposal round-trip.
    let cache = Arc::new(NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap());
    let proposer = Arc::new(MockProposer::new(MockResponse::Error("offline".to_string())));
    let engine = normalizer(cache, proposer.clone(), Arc::new(RunStats::new()));
    let adj = Scripted::new(Verdict::Reject);

    let (value, confidence) = engine.normalize("Washington DC", "location", &[], &adj).await;
    assert_eq!(value, "Washington, DC");
    assert_eq!(confidence, 0.6);
    assert_eq!(proposer.call_count(), 0);
}
