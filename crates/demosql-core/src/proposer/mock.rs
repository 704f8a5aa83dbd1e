//! Mock proposal source for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Proposal, ProposalError, Proposer};

/// A configurable mock response for [`MockProposer`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// A well-formed proposal.
    Proposal { value: String, confidence: f64 },
    /// A malformed-response error, as if the source returned junk.
    Malformed(String),
    /// A transport-level error.
    Error(String),
}

impl MockResponse {
    pub fn proposal(value: impl Into<String>, confidence: f64) -> Self {
        MockResponse::Proposal {
            value: value.into(),
            confidence,
        }
    }
}

/// A hand-rolled mock implementing [`Proposer`] for tests.
///
/// Supports a fixed response or a sequence of responses (one per call,
/// repeating the last when exhausted), plus call counting.
pub struct MockProposer {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    call_count: AtomicUsize,
}

impl MockProposer {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        let fallback = responses.first().cloned().unwrap();
        Self {
            responses: Mutex::new(responses),
            fallback,
            call_count: AtomicUsize::new(0),
        }
    }

    /// How many times `propose()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        let mut seq = self.responses.lock().unwrap();
        if let Some(resp) = seq.pop() {
            resp
        } else {
            self.fallback.clone()
        }
    }
}

impl Proposer for MockProposer {
    fn name(&self) -> &str {
        "mock"
    }

    fn propose<'a>(
        &'a self,
        _field: &'a str,
        _raw_value: &'a str,
        _vocabulary: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Proposal, ProposalError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        Box::pin(async move {
            match response {
                MockResponse::Proposal { value, confidence } => Ok(Proposal {
                    normalized_value: value,
                    confidence_score: confidence,
                }),
                MockResponse::Malformed(msg) => Err(ProposalError::Shape(msg)),
                MockResponse::Error(msg) => Err(ProposalError::Http(msg)),
            }
        })
    }
}
