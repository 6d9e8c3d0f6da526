//! Coordination core for one call.
//!
//! This module implements the single-writer pattern around the session:
//! every engine event and every analysis settlement funnels through
//! [`CallState::handle`], which mutates the owned state and returns a
//! list of effects for the event loop to execute.
//!
//! Key rules:
//! - Events stamped with a stale generation are dropped, never applied.
//! - Each final segment produces exactly one dispatch effect.
//! - Settlements pass through the sequencer, so alerts and timeline
//!   entries always apply in dispatch order however responses arrive.

use tokio_util::sync::CancellationToken;

use crate::alerts::AlertFeed;
use crate::analysis::{AnalysisJob, AnalysisResponse, CompletionSequencer};
use crate::recognition::{RecognitionConfig, RecognitionErrorCode, Segment};
use crate::session::{CallStatus, Session};
use crate::timeline::{Severity, Timeline, TimelineEvent};
use crate::UiEvent;

/// Events driving the call loop. Engine and analysis events carry the
/// generation they were spawned under.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// User pressed start.
    StartCall,
    /// User pressed stop.
    StopCall,
    /// Application exit requested; handled at the loop edge.
    Shutdown,

    // Engine events
    EngineStarted {
        generation: u64,
    },
    SegmentReceived {
        generation: u64,
        segment: Segment,
    },
    EngineEnded {
        generation: u64,
    },
    EngineFailed {
        generation: u64,
        code: RecognitionErrorCode,
    },

    // Analysis events
    AnalysisSettled {
        generation: u64,
        seq: u64,
        outcome: Option<AnalysisResponse>,
    },
}

/// Effects to be executed by the event loop after handling an event.
#[derive(Debug, Clone)]
pub enum Effect {
    StartEngine {
        generation: u64,
        config: RecognitionConfig,
        cancel: CancellationToken,
    },
    Dispatch(AnalysisJob),
    Ui(UiEvent),
}

/// Per-call counters, logged once when the call ends.
#[derive(Debug, Default, Clone)]
struct CallDiagnostics {
    final_segments: u64,
    interim_segments: u64,
    dispatched: u64,
    gaps: u64,
    alerts_shown: u64,
    duplicates_dropped: u64,
    stale_dropped: u64,
    engine_restarts: u64,
}

/// All mutable state for the active call, owned by the event-loop task.
pub struct CallState {
    session: Session,
    feed: AlertFeed,
    timeline: Timeline,
    sequencer: CompletionSequencer,
    config: RecognitionConfig,
    /// Last sequence number handed to a dispatch.
    dispatch_seq: u64,
    /// True between an auto-restart being issued and the restarted run
    /// reporting in; suppresses the user-visible connect notice.
    auto_restarting: bool,
    diag: CallDiagnostics,
}

impl CallState {
    pub fn new(config: RecognitionConfig) -> Self {
        Self {
            session: Session::new(),
            feed: AlertFeed::new(),
            timeline: Timeline::new(),
            sequencer: CompletionSequencer::new(),
            config,
            dispatch_seq: 0,
            auto_restarting: false,
            diag: CallDiagnostics::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn feed(&self) -> &AlertFeed {
        &self.feed
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Apply one event, returning the effects to execute.
    pub fn handle(&mut self, event: CallEvent) -> Vec<Effect> {
        match event {
            CallEvent::StartCall => self.on_start(),
            CallEvent::StopCall => self.on_stop(),
            CallEvent::Shutdown => Vec::new(),
            CallEvent::EngineStarted { generation } => self.on_engine_started(generation),
            CallEvent::SegmentReceived {
                generation,
                segment,
            } => self.on_segment(generation, segment),
            CallEvent::EngineEnded { generation } => self.on_engine_ended(generation),
            CallEvent::EngineFailed { generation, code } => self.on_engine_failed(generation, code),
            CallEvent::AnalysisSettled {
                generation,
                seq,
                outcome,
            } => self.on_analysis_settled(generation, seq, outcome),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.session.is_active() {
            log::warn!("Start requested while a call is already active");
            return Vec::new();
        }

        self.session.reset();
        self.sequencer.reset();
        self.feed.clear();
        self.timeline.clear();
        self.dispatch_seq = 0;
        self.auto_restarting = false;
        self.diag = CallDiagnostics::default();

        vec![
            Effect::Ui(UiEvent::Status {
                status: CallStatus::Connecting,
            }),
            Effect::StartEngine {
                generation: self.session.generation(),
                config: self.config.clone(),
                cancel: self.session.cancel_token(),
            },
        ]
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if !self.session.is_active() {
            return Vec::new();
        }

        self.session.end();
        let d = &self.diag;
        log::info!(
            "Call {} ended: {} final / {} interim segments, {} dispatched, {} gaps, {} alerts shown ({} duplicates), {} stale drops, {} engine restarts, {} transcript chars",
            self.session.id(),
            d.final_segments,
            d.interim_segments,
            d.dispatched,
            d.gaps,
            d.alerts_shown,
            d.duplicates_dropped,
            d.stale_dropped,
            d.engine_restarts,
            self.session.transcript().len(),
        );

        vec![Effect::Ui(UiEvent::Status {
            status: CallStatus::Ended,
        })]
    }

    fn on_engine_started(&mut self, generation: u64) -> Vec<Effect> {
        if self.is_stale(generation) {
            return Vec::new();
        }

        if !self.session.transition(CallStatus::Listening) {
            return Vec::new();
        }
        if self.auto_restarting {
            // Restart is invisible to the user.
            self.auto_restarting = false;
            return Vec::new();
        }
        vec![
            Effect::Ui(UiEvent::Status {
                status: CallStatus::Listening,
            }),
            Effect::Ui(UiEvent::Notice {
                text: "Connected. Start speaking...".to_string(),
            }),
        ]
    }

    fn on_segment(&mut self, generation: u64, segment: Segment) -> Vec<Effect> {
        if self.is_stale(generation) || !self.session.is_active() {
            return Vec::new();
        }

        if !segment.is_final {
            self.diag.interim_segments += 1;
            return vec![Effect::Ui(UiEvent::Caption { text: segment.text })];
        }

        let text = segment.text.trim().to_string();
        if text.is_empty() {
            return Vec::new();
        }

        self.diag.final_segments += 1;
        self.session.append_final(&text);

        self.dispatch_seq += 1;
        self.diag.dispatched += 1;
        let job = AnalysisJob {
            generation,
            seq: self.dispatch_seq,
            chunk: text.clone(),
            cancel: self.session.cancel_token(),
        };
        log::debug!("Dispatching analysis seq {} ({} chars)", job.seq, job.chunk.len());

        vec![
            Effect::Ui(UiEvent::TranscriptFinal { text }),
            Effect::Dispatch(job),
        ]
    }

    fn on_engine_ended(&mut self, generation: u64) -> Vec<Effect> {
        if self.is_stale(generation) || !self.session.is_active() {
            return Vec::new();
        }

        // The engine's natural timeout mid-call: restart with identical
        // configuration, no user-visible status change.
        log::info!("Recognition stream ended mid-call, restarting");
        self.session.transition(CallStatus::Connecting);
        self.auto_restarting = true;
        self.diag.engine_restarts += 1;

        vec![Effect::StartEngine {
            generation: self.session.generation(),
            config: self.config.clone(),
            cancel: self.session.cancel_token(),
        }]
    }

    fn on_engine_failed(&mut self, generation: u64, code: RecognitionErrorCode) -> Vec<Effect> {
        if self.is_stale(generation) || !self.session.is_active() {
            return Vec::new();
        }

        match code {
            RecognitionErrorCode::NoSpeech | RecognitionErrorCode::AudioCapture => {
                vec![Effect::Ui(UiEvent::Notice {
                    text: "Did not catch that. Still listening...".to_string(),
                })]
            }
            RecognitionErrorCode::NotAllowed => {
                log::error!("Microphone permission denied, call cannot proceed");
                self.session.fail();
                vec![
                    Effect::Ui(UiEvent::Status {
                        status: CallStatus::Errored,
                    }),
                    Effect::Ui(UiEvent::Notice {
                        text: "Microphone access was denied. The call cannot continue."
                            .to_string(),
                    }),
                ]
            }
            RecognitionErrorCode::Network => {
                log::warn!("Speech engine reported a network error, continuing degraded");
                vec![Effect::Ui(UiEvent::Notice {
                    text: "Network trouble reaching the speech service. Still listening..."
                        .to_string(),
                })]
            }
            other => {
                log::warn!("Speech recognition error: {}", other.code());
                vec![Effect::Ui(UiEvent::Notice {
                    text: format!("An unexpected error occurred: '{}'", other.code()),
                })]
            }
        }
    }

    fn on_analysis_settled(
        &mut self,
        generation: u64,
        seq: u64,
        outcome: Option<AnalysisResponse>,
    ) -> Vec<Effect> {
        if generation != self.session.generation() || !self.session.is_active() {
            // Completed after the call it belonged to was torn down.
            self.diag.stale_dropped += 1;
            log::debug!(
                "Discarding stale analysis settlement seq {} (generation {})",
                seq,
                generation
            );
            return Vec::new();
        }

        if outcome.is_none() {
            self.diag.gaps += 1;
        }

        let mut effects = Vec::new();
        for (seq, response) in self.sequencer.settle(seq, outcome) {
            log::debug!(
                "Applying analysis seq {}: {} alert(s)",
                seq,
                response.alerts.len()
            );

            let shown = self.feed.reconcile(&mut self.session, &response.alerts);
            self.diag.alerts_shown += shown.len() as u64;
            self.diag.duplicates_dropped += (response.alerts.len() - shown.len()) as u64;
            for alert in shown {
                effects.push(Effect::Ui(UiEvent::AlertShown { alert }));
            }

            let severity = Severity::from_alerts(&response.alerts);
            let event = TimelineEvent::new(response.summary_chunk, severity);
            self.timeline.push(event.clone());
            effects.push(Effect::Ui(UiEvent::TimelineAppended { event }));
        }
        effects
    }

    fn is_stale(&mut self, generation: u64) -> bool {
        if generation == self.session.generation() {
            return false;
        }
        self.diag.stale_dropped += 1;
        log::debug!(
            "Dropping event from stale generation {} (current {})",
            generation,
            self.session.generation()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertType};

    fn state() -> CallState {
        CallState::new(RecognitionConfig::default())
    }

    /// Drive a call to `listening`, discarding the startup effects.
    fn started() -> CallState {
        let mut s = state();
        s.handle(CallEvent::StartCall);
        s.handle(CallEvent::EngineStarted {
            generation: s.session().generation(),
        });
        s
    }

    fn final_segment(state: &CallState, text: &str) -> CallEvent {
        CallEvent::SegmentReceived {
            generation: state.session().generation(),
            segment: Segment::finalized(text),
        }
    }

    fn response_with(alerts: Vec<Alert>, summary: &str) -> AnalysisResponse {
        AnalysisResponse {
            summary_chunk: summary.to_string(),
            alerts,
        }
    }

    fn pressure_alert() -> Alert {
        Alert {
            alert_type: AlertType::Pressure,
            title: "Pressure Tactic Detected".to_string(),
            message: "Urgency and threats.".to_string(),
            suggestion: "I will not be rushed.".to_string(),
        }
    }

    fn dispatches(effects: &[Effect]) -> Vec<&AnalysisJob> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Dispatch(job) => Some(job),
                _ => None,
            })
            .collect()
    }

    fn timeline_summaries(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Ui(UiEvent::TimelineAppended { event }) => Some(event.summary.clone()),
                _ => None,
            })
            .collect()
    }

    fn shown_alert_titles(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Ui(UiEvent::AlertShown { alert }) => Some(alert.title.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_call_enters_connecting_and_starts_the_engine() {
        let mut s = state();
        let effects = s.handle(CallEvent::StartCall);

        assert_eq!(s.session().status(), CallStatus::Connecting);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartEngine { .. })));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Ui(UiEvent::Status {
                status: CallStatus::Connecting
            })
        )));
    }

    #[test]
    fn engine_started_announces_the_connection_once() {
        let mut s = state();
        s.handle(CallEvent::StartCall);
        let effects = s.handle(CallEvent::EngineStarted {
            generation: s.session().generation(),
        });

        assert_eq!(s.session().status(), CallStatus::Listening);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Ui(UiEvent::Notice { text }) if text.contains("Connected")
        )));
    }

    #[test]
    fn each_final_segment_dispatches_exactly_once_in_sequence() {
        let mut s = started();

        let first = s.handle(final_segment(&s, "This is a final notice"));
        let second = s.handle(final_segment(&s, "What is your name and date of birth?"));

        let d1 = dispatches(&first);
        let d2 = dispatches(&second);
        assert_eq!(d1.len(), 1);
        assert_eq!(d2.len(), 1);
        assert_eq!(d1[0].seq, 1);
        assert_eq!(d2[0].seq, 2);
        assert_eq!(d2[0].chunk, "What is your name and date of birth?");

        assert_eq!(
            s.session().transcript(),
            "This is a final notice What is your name and date of birth?"
        );
    }

    #[test]
    fn interim_segments_only_update_the_caption() {
        let mut s = started();

        let effects = s.handle(CallEvent::SegmentReceived {
            generation: s.session().generation(),
            segment: Segment::interim("this is a fin"),
        });

        assert!(dispatches(&effects).is_empty());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Ui(UiEvent::Caption { .. }))));
        assert_eq!(s.session().transcript(), "");
    }

    #[test]
    fn segments_from_a_stale_generation_are_dropped() {
        let mut s = started();
        let old_generation = s.session().generation();

        s.handle(CallEvent::StopCall);
        s.handle(CallEvent::StartCall);

        let effects = s.handle(CallEvent::SegmentReceived {
            generation: old_generation,
            segment: Segment::finalized("left over"),
        });
        assert!(effects.is_empty());
        assert_eq!(s.session().transcript(), "");
    }

    #[test]
    fn out_of_order_settlements_apply_in_dispatch_order() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(final_segment(&s, "first chunk"));
        s.handle(final_segment(&s, "second chunk"));

        // The later request resolves first: nothing applies yet.
        let early = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 2,
            outcome: Some(response_with(vec![], "second summary")),
        });
        assert!(timeline_summaries(&early).is_empty());

        let released = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 1,
            outcome: Some(response_with(vec![], "first summary")),
        });
        assert_eq!(
            timeline_summaries(&released),
            vec!["first summary".to_string(), "second summary".to_string()]
        );
        assert_eq!(s.timeline().len(), 2);
    }

    #[test]
    fn a_dropped_request_leaves_a_gap_but_later_chunks_still_apply() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(final_segment(&s, "lost chunk"));
        s.handle(final_segment(&s, "good chunk"));

        s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 2,
            outcome: Some(response_with(vec![], "good summary")),
        });
        let effects = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 1,
            outcome: None,
        });

        assert_eq!(timeline_summaries(&effects), vec!["good summary".to_string()]);
        assert_eq!(s.timeline().len(), 1);
    }

    #[test]
    fn settlement_after_stop_does_not_mutate_state() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(final_segment(&s, "chunk"));
        s.handle(CallEvent::StopCall);

        let effects = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 1,
            outcome: Some(response_with(vec![pressure_alert()], "late summary")),
        });

        assert!(effects.is_empty());
        assert!(s.timeline().is_empty());
        assert!(s.feed().is_empty());
    }

    #[test]
    fn settlement_after_reset_does_not_touch_the_new_session() {
        let mut s = started();
        let old_generation = s.session().generation();
        s.handle(final_segment(&s, "chunk"));

        s.handle(CallEvent::StopCall);
        s.handle(CallEvent::StartCall);
        s.handle(CallEvent::EngineStarted {
            generation: s.session().generation(),
        });

        let effects = s.handle(CallEvent::AnalysisSettled {
            generation: old_generation,
            seq: 1,
            outcome: Some(response_with(vec![pressure_alert()], "stale")),
        });

        assert!(effects.is_empty());
        assert!(s.timeline().is_empty());
        assert!(s.feed().is_empty());
    }

    #[test]
    fn duplicate_alert_keys_surface_one_card() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(final_segment(&s, "act now"));
        s.handle(final_segment(&s, "final notice"));

        let first = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 1,
            outcome: Some(response_with(vec![pressure_alert()], "one")),
        });
        let second = s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 2,
            outcome: Some(response_with(vec![pressure_alert()], "two")),
        });

        assert_eq!(shown_alert_titles(&first).len(), 1);
        assert!(shown_alert_titles(&second).is_empty());
        assert_eq!(s.feed().len(), 1);
        // Both responses still produce timeline events.
        assert_eq!(s.timeline().len(), 2);
        assert_eq!(s.timeline().events()[1].severity, Severity::Pressure);
    }

    #[test]
    fn engine_end_mid_call_restarts_without_ui_noise() {
        let mut s = started();
        let generation = s.session().generation();

        let effects = s.handle(CallEvent::EngineEnded { generation });
        assert_eq!(s.session().status(), CallStatus::Connecting);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::StartEngine { .. }));

        // The restarted run reports in silently.
        let effects = s.handle(CallEvent::EngineStarted { generation });
        assert_eq!(s.session().status(), CallStatus::Listening);
        assert!(effects.is_empty());
    }

    #[test]
    fn engine_end_after_stop_does_not_restart() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(CallEvent::StopCall);

        let effects = s.handle(CallEvent::EngineEnded { generation });
        assert!(effects.is_empty());
    }

    #[test]
    fn permission_denial_is_fatal() {
        let mut s = state();
        s.handle(CallEvent::StartCall);
        let effects = s.handle(CallEvent::EngineFailed {
            generation: s.session().generation(),
            code: RecognitionErrorCode::NotAllowed,
        });

        assert_eq!(s.session().status(), CallStatus::Errored);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Ui(UiEvent::Status {
                status: CallStatus::Errored
            })
        )));
    }

    #[test]
    fn transient_errors_keep_the_call_alive() {
        let mut s = started();
        let generation = s.session().generation();

        for code in [
            RecognitionErrorCode::NoSpeech,
            RecognitionErrorCode::AudioCapture,
            RecognitionErrorCode::Network,
            RecognitionErrorCode::Other("weird".to_string()),
        ] {
            let effects = s.handle(CallEvent::EngineFailed {
                generation,
                code,
            });
            assert_eq!(s.session().status(), CallStatus::Listening);
            assert!(effects
                .iter()
                .any(|e| matches!(e, Effect::Ui(UiEvent::Notice { .. }))));
        }
    }

    #[test]
    fn restart_reuses_identical_configuration() {
        let mut s = started();
        let generation = s.session().generation();

        let effects = s.handle(CallEvent::EngineEnded { generation });
        match &effects[0] {
            Effect::StartEngine { config, .. } => {
                assert!(config.continuous);
                assert!(config.interim_results);
                assert_eq!(config.language, "en-US");
            }
            other => panic!("Expected StartEngine, got {:?}", other),
        }
    }

    #[test]
    fn start_clears_everything_from_the_previous_call() {
        let mut s = started();
        let generation = s.session().generation();
        s.handle(final_segment(&s, "old words"));
        s.handle(CallEvent::AnalysisSettled {
            generation,
            seq: 1,
            outcome: Some(response_with(vec![pressure_alert()], "old summary")),
        });
        s.handle(CallEvent::StopCall);

        s.handle(CallEvent::StartCall);

        assert_eq!(s.session().transcript(), "");
        assert!(s.feed().is_empty());
        assert!(s.timeline().is_empty());
        assert_eq!(s.session().status(), CallStatus::Connecting);
    }
}
