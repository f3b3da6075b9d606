//! majordome - voice/text assistant interaction core.
//!
//! Talks to a UI shell via JSON-line IPC on stdin/stdout and to the
//! assistant backend service over HTTP. This entry point wires the
//! subsystems together and runs the main event loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use majordome::audio::capture::MicCapture;
use majordome::backend::http::HttpBackend;
use majordome::config;
use majordome::controller::{ControllerEvent, InteractionController};
use majordome::ipc::bridge::{emit_event, spawn_stdin_reader};
use majordome::ipc::{UiCommand, UiEvent};
use majordome::playback::SpeechPlayer;

#[tokio::main]
async fn main() {
    // Initialize tracing (respects RUST_LOG env, defaults to info).
    // stdout carries the IPC protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    emit_event(&UiEvent::Starting {});

    let cfg = config::read_config();
    info!(?cfg, "configuration loaded");

    let http = Arc::new(HttpBackend::new(&cfg.endpoint, cfg.voice_response));
    if let Err(err) = http.ping().await {
        warn!(error = %err, endpoint = %cfg.endpoint, "assistant backend not reachable yet");
    }

    let capture = Box::new(MicCapture::new(cfg.input_device.clone()));
    let player = Arc::new(SpeechPlayer::new(&cfg.endpoint, cfg.volume as f32));

    let (mut controller, mut ctl_events) = InteractionController::new(
        capture,
        http,
        player,
        Duration::from_secs(cfg.request_timeout_secs),
    );

    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&UiEvent::Ready {});
    info!("assistant core ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&mut controller, command).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            ev = ctl_events.recv() => {
                if let Some(ev) = ev {
                    forward_event(ev);
                }
            }
        }
    }

    info!("assistant core shutting down");
}

/// Handle one command from the UI shell. Returns `false` when the main
/// loop should exit.
async fn handle_command(controller: &mut InteractionController, cmd: UiCommand) -> bool {
    match cmd {
        UiCommand::ToggleRecording {} => controller.toggle_voice().await,
        UiCommand::StartRecording {} => controller.start_recording().await,
        UiCommand::StopRecording {} => controller.stop_recording().await,
        UiCommand::SubmitText { text } => controller.submit_text(&text).await,
        UiCommand::GetTranscript {} => {
            emit_event(&UiEvent::Transcript {
                messages: controller.transcript().snapshot(),
            });
        }
        UiCommand::Ping {} => emit_event(&UiEvent::Pong {}),
        UiCommand::Stop {} => {
            emit_event(&UiEvent::Stopping {});
            return false;
        }
    }
    true
}

fn forward_event(ev: ControllerEvent) {
    let ui = match ev {
        ControllerEvent::StateChanged(state) => UiEvent::StateChange {
            state: state.to_string(),
        },
        ControllerEvent::MessageAppended(message) => UiEvent::MessageAppended { message },
        ControllerEvent::MessageUpdated(message) => UiEvent::MessageUpdated { message },
        ControllerEvent::ReplyAudio { url } => UiEvent::ReplyAudio { url },
    };
    emit_event(&ui);
}
