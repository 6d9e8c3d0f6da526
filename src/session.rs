//! Call-scoped session state.
//!
//! A single `Session` lives for the whole process and is reset on every
//! call start. All mutation happens on the event-loop task; asynchronous
//! work holds only the generation number and the cancellation token, and
//! anything that completes after a reset is rejected by the generation
//! check.
//!
//! Status machine:
//!
//! ```text
//! idle -> connecting -> listening -> {ended, errored}
//!              ^             |
//!              +-------------+   (auto-restart only, not user-visible)
//! ```
//!
//! `ended` and `errored` are terminal until the next explicit call start,
//! which re-enters at `connecting` via `reset()`.

use std::collections::HashSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alerts::AlertKey;

/// UI-facing status of the active call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Idle,
    Connecting,
    Listening,
    Ended,
    Errored,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Connecting => "connecting",
            CallStatus::Listening => "listening",
            CallStatus::Ended => "ended",
            CallStatus::Errored => "errored",
        }
    }

    fn allows(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Listening)
                | (Connecting, Ended)
                | (Connecting, Errored)
                | (Listening, Connecting)
                | (Listening, Ended)
                | (Listening, Errored)
                | (Ended, Connecting)
                | (Errored, Connecting)
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state for the one active call.
#[derive(Debug)]
pub struct Session {
    /// Log-correlation id for the current call.
    id: Uuid,
    /// Bumped on every reset; stale async completions carry an older value.
    generation: u64,
    status: CallStatus,
    /// Final segment texts joined with single spaces. Interim text never
    /// enters this accumulator.
    transcript: String,
    shown_alert_keys: HashSet<AlertKey>,
    cancel: CancellationToken,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            status: CallStatus::Idle,
            transcript: String::new(),
            shown_alert_keys: HashSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a fresh call: cancel outstanding work from the previous one,
    /// bump the generation, clear every collection, enter `connecting`.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;
        self.id = Uuid::new_v4();
        self.transcript.clear();
        self.shown_alert_keys.clear();
        self.status = CallStatus::Connecting;
        log::info!("Session {} started (generation {})", self.id, self.generation);
    }

    /// Append one final segment's text to the transcript accumulator.
    pub fn append_final(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(trimmed);
    }

    /// The sole deduplication gate. Returns true exactly once per key per
    /// session.
    pub fn mark_alert_shown(&mut self, key: AlertKey) -> bool {
        self.shown_alert_keys.insert(key)
    }

    /// Attempt a status transition. Invalid transitions are logged and
    /// rejected, never applied.
    pub fn transition(&mut self, next: CallStatus) -> bool {
        if self.status.allows(next) {
            log::debug!("Session {}: {} -> {}", self.id, self.status, next);
            self.status = next;
            true
        } else {
            log::warn!(
                "Session {}: rejected transition {} -> {}",
                self.id,
                self.status,
                next
            );
            false
        }
    }

    /// End the call normally; outstanding async work is cancelled and any
    /// late completions are discarded by the activity check.
    pub fn end(&mut self) -> bool {
        let ok = self.transition(CallStatus::Ended);
        if ok {
            self.cancel.cancel();
        }
        ok
    }

    /// Fail the call (capability-unavailable class errors).
    pub fn fail(&mut self) -> bool {
        let ok = self.transition(CallStatus::Errored);
        if ok {
            self.cancel.cancel();
        }
        ok
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, CallStatus::Connecting | CallStatus::Listening)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Token tied to the current generation; cancelled on end, fail, and
    /// reset.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertType;

    #[test]
    fn transcript_joins_final_segments_with_single_spaces() {
        let mut session = Session::new();
        session.reset();

        session.append_final("This is a final notice");
        session.append_final("  What is your name and date of birth?  ");

        assert_eq!(
            session.transcript(),
            "This is a final notice What is your name and date of birth?"
        );
    }

    #[test]
    fn empty_segment_text_is_ignored() {
        let mut session = Session::new();
        session.reset();
        session.append_final("hello");
        session.append_final("   ");
        assert_eq!(session.transcript(), "hello");
    }

    #[test]
    fn mark_alert_shown_is_idempotent_per_key() {
        let mut session = Session::new();
        session.reset();

        let key = (AlertType::Pressure, "Pressure Tactic Detected".to_string());
        assert!(session.mark_alert_shown(key.clone()));
        assert!(!session.mark_alert_shown(key));
    }

    #[test]
    fn reset_clears_state_and_bumps_generation() {
        let mut session = Session::new();
        session.reset();
        session.append_final("some speech");
        session.mark_alert_shown((AlertType::Jargon, "Jargon: 'APR'".to_string()));
        let first_generation = session.generation();
        let old_token = session.cancel_token();

        session.reset();

        assert_eq!(session.transcript(), "");
        assert!(session.mark_alert_shown((AlertType::Jargon, "Jargon: 'APR'".to_string())));
        assert_eq!(session.generation(), first_generation + 1);
        assert_eq!(session.status(), CallStatus::Connecting);
        assert!(old_token.is_cancelled());
        assert!(!session.cancel_token().is_cancelled());
    }

    #[test]
    fn status_machine_accepts_the_documented_path() {
        let mut session = Session::new();
        assert_eq!(session.status(), CallStatus::Idle);

        session.reset();
        assert_eq!(session.status(), CallStatus::Connecting);
        assert!(session.transition(CallStatus::Listening));
        // Auto-restart path.
        assert!(session.transition(CallStatus::Connecting));
        assert!(session.transition(CallStatus::Listening));
        assert!(session.end());
        assert_eq!(session.status(), CallStatus::Ended);
    }

    #[test]
    fn terminal_states_reject_everything_but_reset() {
        let mut session = Session::new();
        session.reset();
        session.transition(CallStatus::Listening);
        session.end();

        assert!(!session.transition(CallStatus::Listening));
        assert!(!session.transition(CallStatus::Errored));
        assert!(!session.is_active());

        session.reset();
        assert_eq!(session.status(), CallStatus::Connecting);
        assert!(session.is_active());
    }

    #[test]
    fn end_cancels_outstanding_work() {
        let mut session = Session::new();
        session.reset();
        let token = session.cancel_token();
        assert!(!token.is_cancelled());

        session.transition(CallStatus::Listening);
        session.end();
        assert!(token.is_cancelled());
    }
}
