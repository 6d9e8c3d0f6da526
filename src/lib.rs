//! Clarity: a call assistant that listens to live speech and flags
//! manipulative or high-pressure language in near real time.
//!
//! # Architecture
//!
//! ```text
//! SpeechEngine ──▶ CallEvent channel ──▶ CallState (single writer)
//!                        ▲                    │
//!                        │                    ├─▶ Dispatch ──▶ AnalysisBackend
//!                        └── settlements ◀────┘                 (async, unordered)
//!                                             │
//!                                             └─▶ UiEvent channel ──▶ surface
//! ```
//!
//! One event-loop task owns all call state. Engine runs and analysis
//! requests are detached tasks that only talk back through the event
//! channel; stale completions are rejected by the session generation.

pub mod alerts;
pub mod analysis;
pub mod call;
pub mod config;
pub mod proxy;
pub mod recognition;
pub mod session;
pub mod timeline;

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use alerts::Alert;
use analysis::{AnalysisBackend, HttpAnalysisBackend};
use call::{CallEvent, CallState, Effect};
use config::AppSettings;
use recognition::{ConsoleEngine, RecognitionConfig, SpeechEngine};
use session::CallStatus;
use timeline::TimelineEvent;

/// Events for the user-facing surface.
///
/// Tagged union format: `{ "kind": "caption", "text": "..." }`. The
/// caption replaces the previous one in place; transcript text appends;
/// alerts prepend (most recent first); timeline events append.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UiEvent {
    Status { status: CallStatus },
    Caption { text: String },
    TranscriptFinal { text: String },
    Notice { text: String },
    AlertShown { alert: Alert },
    TimelineAppended { event: TimelineEvent },
}

/// Run the main call loop until `Shutdown` is received.
///
/// Effects returned by the state are executed here: engine runs and
/// analysis jobs get the loop's own sender so their completions feed
/// back in as events.
pub async fn run_call_loop(
    mut rx: mpsc::Receiver<CallEvent>,
    tx: mpsc::Sender<CallEvent>,
    engine: Arc<dyn SpeechEngine>,
    backend: Arc<dyn AnalysisBackend>,
    ui: mpsc::Sender<UiEvent>,
    config: RecognitionConfig,
) {
    let mut state = CallState::new(config);
    log::info!("Call loop started");

    while let Some(event) = rx.recv().await {
        if matches!(event, CallEvent::Shutdown) {
            log::info!("Shutdown requested, leaving call loop");
            break;
        }
        log::debug!("Call event: {:?}", event);

        for effect in state.handle(event) {
            match effect {
                Effect::StartEngine {
                    generation,
                    config,
                    cancel,
                } => engine.spawn(generation, config, cancel, tx.clone()),
                Effect::Dispatch(job) => backend.spawn(job, tx.clone()),
                Effect::Ui(event) => {
                    if ui.send(event).await.is_err() {
                        log::warn!("UI surface gone, dropping event");
                    }
                }
            }
        }
    }

    log::info!("Call loop ended");
}

/// Console front end: serves the analyze proxy and drives a call from
/// stdin lines, which stand in for the speech capability's final
/// segments.
pub async fn run(settings: AppSettings) {
    match settings.proxy_addr.parse() {
        Ok(addr) => {
            tokio::spawn(async move {
                if let Err(e) = proxy::serve(addr).await {
                    log::error!("Analyze proxy failed: {}", e);
                }
            });
        }
        Err(e) => {
            log::error!("Invalid proxy_addr {:?}: {}", settings.proxy_addr, e);
        }
    }

    let (event_tx, event_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(64);
    let (engine, line_tx) = ConsoleEngine::new();

    let backend = Arc::new(HttpAnalysisBackend::new(settings.analyzer_url.clone()));
    let recognition_config = RecognitionConfig {
        language: settings.language.clone(),
        ..RecognitionConfig::default()
    };

    let loop_handle = tokio::spawn(run_call_loop(
        event_rx,
        event_tx.clone(),
        Arc::new(engine),
        backend,
        ui_tx,
        recognition_config,
    ));
    let render_handle = tokio::spawn(render_ui(ui_rx));

    println!("Type /start to begin call analysis, /stop to end it, /quit to exit.");
    println!("While a call is active, every line you type is analyzed as speech.");

    let mut call_active = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            "/start" => {
                call_active = true;
                let _ = event_tx.send(CallEvent::StartCall).await;
            }
            "/stop" => {
                call_active = false;
                let _ = event_tx.send(CallEvent::StopCall).await;
            }
            "/quit" => break,
            text if call_active => {
                let _ = line_tx.send(text.to_string()).await;
            }
            _ => println!("No active call. Type /start first."),
        }
    }

    let _ = event_tx.send(CallEvent::StopCall).await;
    let _ = event_tx.send(CallEvent::Shutdown).await;
    drop(line_tx);

    let _ = loop_handle.await;
    let _ = render_handle.await;
}

async fn render_ui(mut rx: mpsc::Receiver<UiEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::Status { status } => println!("-- call {} --", status),
            UiEvent::Caption { text } => println!("   ... {}", text),
            UiEvent::TranscriptFinal { text } => println!(" > {}", text),
            UiEvent::Notice { text } => println!(" [notice] {}", text),
            UiEvent::AlertShown { alert } => {
                println!(" !! [{}] {}", alert.alert_type.as_str(), alert.title);
                println!("    {}", alert.message);
                println!("    Suggested: \"{}\"", alert.suggestion);
            }
            UiEvent::TimelineAppended { event } => println!(
                " @ {} [{}] {}",
                event.display_time(),
                event.severity.as_str(),
                event.summary
            ),
        }
    }
}
