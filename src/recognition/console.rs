//! Console stand-in for the speech capability: every line pushed into the
//! engine becomes one final segment. Interim segments do not occur on this
//! engine; the caption path is exercised by the scripted engine instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{RecognitionConfig, RecognitionErrorCode, Segment, SpeechEngine};
use crate::call::CallEvent;

pub struct ConsoleEngine {
    /// Shared across runs so an auto-restart keeps draining the same
    /// line stream.
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
    /// Set once the line source closes; a restarted run must not report
    /// end-of-stream again or the restart loop would spin.
    closed: Arc<AtomicBool>,
}

impl ConsoleEngine {
    /// Returns the engine and the sender that feeds it utterances.
    pub fn new() -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                lines: Arc::new(Mutex::new(rx)),
                closed: Arc::new(AtomicBool::new(false)),
            },
            tx,
        )
    }
}

impl SpeechEngine for ConsoleEngine {
    fn spawn(
        &self,
        generation: u64,
        _config: RecognitionConfig,
        cancel: CancellationToken,
        events: mpsc::Sender<CallEvent>,
    ) {
        let lines = self.lines.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            if events
                .send(CallEvent::EngineStarted { generation })
                .await
                .is_err()
            {
                return;
            }

            if closed.load(Ordering::Acquire) {
                let _ = events
                    .send(CallEvent::EngineFailed {
                        generation,
                        code: RecognitionErrorCode::Aborted,
                    })
                    .await;
                return;
            }

            let mut rx = lines.lock().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("Console run released (generation {})", generation);
                        return;
                    }
                    line = rx.recv() => match line {
                        Some(text) => {
                            let event = CallEvent::SegmentReceived {
                                generation,
                                segment: Segment::finalized(text),
                            };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            // Line source closed; report end-of-stream like a
                            // real engine would.
                            closed.store(true, Ordering::Release);
                            let _ = events.send(CallEvent::EngineEnded { generation }).await;
                            return;
                        }
                    }
                }
            }
        });
    }
}
