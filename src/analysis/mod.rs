//! Analysis dispatch: the caller side of the classifier boundary.
//!
//! Each final segment becomes exactly one outbound request, stamped with
//! the session generation and a per-call sequence number. Requests are
//! fire-and-forget tasks with no concurrency limit and no retry; their
//! completions flow back through the event channel and are released in
//! sequence order by the [`CompletionSequencer`].

mod client;
mod dispatcher;
mod sequencer;

pub use client::{AnalysisResponse, AnalyzerClient};
pub use dispatcher::{AnalysisBackend, HttpAnalysisBackend, StubAnalysisBackend, StubReply};
pub use sequencer::CompletionSequencer;

use tokio_util::sync::CancellationToken;

/// One outbound classification request.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    /// Session generation this job was dispatched under.
    pub generation: u64,
    /// Per-call sequence number, starting at 1.
    pub seq: u64,
    /// The newest final segment's text (incremental dispatch).
    pub chunk: String,
    /// Fires on session teardown; a cancelled job settles nothing.
    pub cancel: CancellationToken,
}

/// Errors from the analyzer client.
#[derive(Debug)]
pub enum AnalysisError {
    /// Network/transport failure reaching the analyze endpoint.
    Network(String),
    /// The endpoint answered with a non-success status.
    Api { status: u16, message: String },
    /// The response body did not match the contract.
    Parse(String),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::Network(e) => write!(f, "Network error: {}", e),
            AnalysisError::Api { status, message } => {
                write!(f, "Analyze endpoint error ({}): {}", status, message)
            }
            AnalysisError::Parse(e) => write!(f, "Failed to parse analysis response: {}", e),
        }
    }
}

impl std::error::Error for AnalysisError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_the_status() {
        let err = AnalysisError::Api {
            status: 500,
            message: "Failed to get response from AI".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("Failed to get response from AI"));
    }
}
