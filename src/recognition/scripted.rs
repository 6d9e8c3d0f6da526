//! Deterministic engine for exercising the pipeline without a speech
//! capability. Each `spawn` consumes the next scripted run; once the
//! script is exhausted, further runs idle until cancelled. Used by the
//! integration tests and handy for demos.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{RecognitionConfig, RecognitionErrorCode, Segment, SpeechEngine};
use crate::call::CallEvent;

/// One step of a scripted recognition run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Interim(&'static str),
    Final(&'static str),
    Error(RecognitionErrorCode),
    Pause(Duration),
    /// End the run the way a real engine times out mid-call.
    End,
}

pub struct ScriptedEngine {
    runs: Mutex<VecDeque<Vec<ScriptStep>>>,
}

impl ScriptedEngine {
    pub fn new(runs: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
        }
    }
}

impl SpeechEngine for ScriptedEngine {
    fn spawn(
        &self,
        generation: u64,
        _config: RecognitionConfig,
        cancel: CancellationToken,
        events: mpsc::Sender<CallEvent>,
    ) {
        let steps = self
            .runs
            .lock()
            .expect("scripted runs lock")
            .pop_front()
            .unwrap_or_default();

        tokio::spawn(async move {
            if events
                .send(CallEvent::EngineStarted { generation })
                .await
                .is_err()
            {
                return;
            }

            for step in steps {
                if cancel.is_cancelled() {
                    log::debug!("Scripted run cancelled (generation {})", generation);
                    return;
                }
                let event = match step {
                    ScriptStep::Interim(text) => CallEvent::SegmentReceived {
                        generation,
                        segment: Segment::interim(text),
                    },
                    ScriptStep::Final(text) => CallEvent::SegmentReceived {
                        generation,
                        segment: Segment::finalized(text),
                    },
                    ScriptStep::Error(code) => CallEvent::EngineFailed { generation, code },
                    ScriptStep::Pause(duration) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(duration) => continue,
                        }
                    }
                    ScriptStep::End => {
                        let _ = events.send(CallEvent::EngineEnded { generation }).await;
                        return;
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }

            // Script exhausted: keep the run open until the call tears down.
            cancel.cancelled().await;
        });
    }
}
