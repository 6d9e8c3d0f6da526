//! In-order release of out-of-order analysis completions.
//!
//! Responses may resolve in any order relative to dispatch. The sequencer
//! buffers completions until every earlier sequence number has settled,
//! so timeline events always appear in dispatch order. A request that
//! failed settles as a gap (`None`) and releases whatever was waiting
//! behind it.

use std::collections::BTreeMap;

use super::AnalysisResponse;

#[derive(Debug, Default)]
pub struct CompletionSequencer {
    /// Next sequence number eligible for release.
    next_seq: u64,
    pending: BTreeMap<u64, Option<AnalysisResponse>>,
}

impl CompletionSequencer {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Forget everything and start counting from 1 again (call start).
    pub fn reset(&mut self) {
        self.next_seq = 1;
        self.pending.clear();
    }

    /// Record that `seq` settled with `outcome` and return every response
    /// that is now releasable, in sequence order. Gaps release silently.
    pub fn settle(
        &mut self,
        seq: u64,
        outcome: Option<AnalysisResponse>,
    ) -> Vec<(u64, AnalysisResponse)> {
        if seq < self.next_seq {
            log::warn!("Ignoring settlement for already-released seq {}", seq);
            return Vec::new();
        }
        if self.pending.insert(seq, outcome).is_some() {
            log::warn!("Duplicate settlement for seq {}", seq);
        }

        let mut released = Vec::new();
        while let Some(outcome) = self.pending.remove(&self.next_seq) {
            if let Some(response) = outcome {
                released.push((self.next_seq, response));
            }
            self.next_seq += 1;
        }
        released
    }

    /// Completions held back waiting for earlier sequence numbers.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(summary: &str) -> AnalysisResponse {
        AnalysisResponse {
            summary_chunk: summary.to_string(),
            alerts: Vec::new(),
        }
    }

    #[test]
    fn in_order_completions_release_immediately() {
        let mut seq = CompletionSequencer::new();

        let released = seq.settle(1, Some(response("one")));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0], (1, response("one")));

        let released = seq.settle(2, Some(response("two")));
        assert_eq!(released, vec![(2, response("two"))]);
    }

    #[test]
    fn early_completion_is_buffered_until_predecessors_settle() {
        let mut seq = CompletionSequencer::new();

        assert!(seq.settle(2, Some(response("two"))).is_empty());
        assert_eq!(seq.buffered(), 1);

        let released = seq.settle(1, Some(response("one")));
        assert_eq!(
            released,
            vec![(1, response("one")), (2, response("two"))]
        );
        assert_eq!(seq.buffered(), 0);
    }

    #[test]
    fn a_gap_releases_what_was_waiting_behind_it() {
        let mut seq = CompletionSequencer::new();

        assert!(seq.settle(2, Some(response("two"))).is_empty());
        assert!(seq.settle(3, Some(response("three"))).is_empty());

        // Request 1 was dropped (transport failure): no event for it, but
        // the stream keeps moving.
        let released = seq.settle(1, None);
        assert_eq!(
            released,
            vec![(2, response("two")), (3, response("three"))]
        );
    }

    #[test]
    fn already_released_seq_is_ignored() {
        let mut seq = CompletionSequencer::new();
        seq.settle(1, Some(response("one")));
        assert!(seq.settle(1, Some(response("again"))).is_empty());
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut seq = CompletionSequencer::new();
        seq.settle(1, Some(response("one")));
        seq.settle(3, Some(response("stuck")));

        seq.reset();
        assert_eq!(seq.buffered(), 0);
        let released = seq.settle(1, Some(response("fresh")));
        assert_eq!(released, vec![(1, response("fresh"))]);
    }
}
