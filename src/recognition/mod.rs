//! Segment source: the boundary to the speech-to-text capability.
//!
//! The engine itself is a black box. One *run* of an engine emits
//! `EngineStarted`, zero or more segments (interim and final), and either
//! `EngineEnded` (the engine's natural timeout/segmentation behavior) or
//! `EngineFailed` with an error code. Runs that end while the call is
//! still active are restarted by the coordination core with identical
//! configuration; that restart is what keeps an unbounded call alive.
//!
//! Every event a run emits is stamped with the session generation it was
//! spawned under, so events from a torn-down run are rejected downstream.

mod console;
mod scripted;

pub use console::ConsoleEngine;
pub use scripted::{ScriptStep, ScriptedEngine};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::call::CallEvent;

/// One speech-to-text emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// Final segments accumulate into the transcript and trigger dispatch;
    /// interim segments only update the live caption.
    pub is_final: bool,
}

impl Segment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Engine configuration, identical across restarts of a run.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub continuous: bool,
    pub interim_results: bool,
    pub language: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: "en-US".to_string(),
        }
    }
}

/// Error codes surfaced by an engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    /// No speech detected for a while. Transient.
    NoSpeech,
    /// Audio input dropped out. Transient.
    AudioCapture,
    /// Microphone permission denied. Fatal for the session.
    NotAllowed,
    /// Network trouble between the engine and its backing service.
    Network,
    /// The run was aborted underneath us.
    Aborted,
    /// Anything the engine reports that we do not classify.
    Other(String),
}

impl RecognitionErrorCode {
    pub fn code(&self) -> &str {
        match self {
            RecognitionErrorCode::NoSpeech => "no-speech",
            RecognitionErrorCode::AudioCapture => "audio-capture",
            RecognitionErrorCode::NotAllowed => "not-allowed",
            RecognitionErrorCode::Network => "network",
            RecognitionErrorCode::Aborted => "aborted",
            RecognitionErrorCode::Other(code) => code,
        }
    }

    /// Only a permission denial prevents the call from proceeding.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecognitionErrorCode::NotAllowed)
    }
}

/// A speech engine that can begin recognition runs.
///
/// `spawn` must not block: it starts a detached task that feeds events
/// into `events` until the run ends or `cancel` fires. Cancellation
/// releases the underlying capability promptly.
pub trait SpeechEngine: Send + Sync + 'static {
    fn spawn(
        &self,
        generation: u64,
        config: RecognitionConfig,
        cancel: CancellationToken,
        events: mpsc::Sender<CallEvent>,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_engine_contract() {
        let config = RecognitionConfig::default();
        assert!(config.continuous);
        assert!(config.interim_results);
        assert_eq!(config.language, "en-US");
    }

    #[test]
    fn only_permission_denial_is_fatal() {
        assert!(RecognitionErrorCode::NotAllowed.is_fatal());
        assert!(!RecognitionErrorCode::NoSpeech.is_fatal());
        assert!(!RecognitionErrorCode::Network.is_fatal());
        assert!(!RecognitionErrorCode::Other("weird".to_string()).is_fatal());
    }

    #[test]
    fn error_codes_use_engine_spelling() {
        assert_eq!(RecognitionErrorCode::NoSpeech.code(), "no-speech");
        assert_eq!(RecognitionErrorCode::AudioCapture.code(), "audio-capture");
        assert_eq!(RecognitionErrorCode::Other("boom".to_string()).code(), "boom");
    }
}
