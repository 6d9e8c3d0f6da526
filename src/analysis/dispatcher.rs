//! Backends that execute analysis jobs.
//!
//! A backend turns one [`AnalysisJob`] into a detached task whose
//! settlement event flows back through the call event channel. Every job
//! settles at most once; a cancelled job settles nothing (the session it
//! belonged to is gone).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{AnalysisJob, AnalysisResponse, AnalyzerClient};
use crate::call::CallEvent;

/// Trait seam for running classification requests.
pub trait AnalysisBackend: Send + Sync + 'static {
    fn spawn(&self, job: AnalysisJob, tx: mpsc::Sender<CallEvent>);
}

/// Real backend: POSTs the chunk to the configured analyze endpoint.
pub struct HttpAnalysisBackend {
    client: AnalyzerClient,
}

impl HttpAnalysisBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: AnalyzerClient::new(endpoint),
        }
    }
}

impl AnalysisBackend for HttpAnalysisBackend {
    fn spawn(&self, job: AnalysisJob, tx: mpsc::Sender<CallEvent>) {
        let client = self.client.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = job.cancel.cancelled() => {
                    log::debug!(
                        "Analysis request seq {} abandoned (session torn down)",
                        job.seq
                    );
                }
                result = client.analyze(&job.chunk) => {
                    let outcome = match result {
                        Ok(response) => Some(response),
                        Err(e) => {
                            // Operator-facing diagnostics only; the request is
                            // dropped for good, no retry, no user-visible alert.
                            log::warn!("Analysis request seq {} dropped: {}", job.seq, e);
                            None
                        }
                    };
                    let _ = tx
                        .send(CallEvent::AnalysisSettled {
                            generation: job.generation,
                            seq: job.seq,
                            outcome,
                        })
                        .await;
                }
            }
        });
    }
}

/// One canned backend reply, optionally delayed to model a slow or
/// out-of-order classifier.
#[derive(Debug, Clone)]
pub struct StubReply {
    pub delay: Duration,
    pub outcome: Option<AnalysisResponse>,
}

impl StubReply {
    pub fn immediate(response: AnalysisResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Some(response),
        }
    }

    pub fn delayed(delay: Duration, response: AnalysisResponse) -> Self {
        Self {
            delay,
            outcome: Some(response),
        }
    }

    /// Models a dropped request (transport or contract failure).
    pub fn dropped() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: None,
        }
    }
}

/// Stub backend answering from a queue of canned replies, in dispatch
/// order. Used by the integration tests; an exhausted queue settles jobs
/// as gaps. Unlike the real backend it ignores cancellation, which is
/// exactly what a stale-settlement test needs.
pub struct StubAnalysisBackend {
    replies: Mutex<VecDeque<StubReply>>,
}

impl StubAnalysisBackend {
    pub fn new(replies: Vec<StubReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

impl AnalysisBackend for StubAnalysisBackend {
    fn spawn(&self, job: AnalysisJob, tx: mpsc::Sender<CallEvent>) {
        let reply = self
            .replies
            .lock()
            .expect("stub replies lock")
            .pop_front()
            .unwrap_or_else(StubReply::dropped);

        tokio::spawn(async move {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            let _ = tx
                .send(CallEvent::AnalysisSettled {
                    generation: job.generation,
                    seq: job.seq,
                    outcome: reply.outcome,
                })
                .await;
        });
    }
}
