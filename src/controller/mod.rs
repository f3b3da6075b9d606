//! The interaction controller: composes capture, transcript, dispatch and
//! playback behind a three-state machine.
//!
//! Single-flow by construction: voice and text submission share the
//! `Dispatching` state, so only one dispatch is ever outstanding and a
//! second trigger is rejected rather than queued. All failure paths end
//! back in `Idle`; nothing here is fatal to the process.

mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audio::capture::{CaptureDevice, RecordedAudio};
use crate::backend::{AssistantBackend, DispatchError, VoiceReply};
use crate::playback::PlaybackSink;
use crate::transcript::{Message, MessageStatus, Role, Transcript};

pub use state::ControllerState;
use state::StateCell;

/// Placeholder text on a voice bubble while transcription is in flight.
pub const PROCESSING_PLACEHOLDER: &str = "En cours de traitement...";
/// Replaces the placeholder when a voice dispatch fails.
pub const RECOGNITION_FAILED: &str = "Erreur de reconnaissance vocale";
/// Assistant apology appended on any dispatch failure.
pub const DISPATCH_APOLOGY: &str =
    "Désolé, une erreur est survenue lors du traitement de votre demande.";
/// Assistant message when the microphone cannot be acquired.
pub const MIC_UNAVAILABLE: &str =
    "Impossible d'accéder au microphone. Veuillez vérifier les permissions.";

/// Notifications for the UI layer, emitted on every observable mutation.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged(ControllerState),
    MessageAppended(Message),
    MessageUpdated(Message),
    ReplyAudio { url: String },
}

pub struct InteractionController {
    state: StateCell,
    transcript: Transcript,
    capture: Box<dyn CaptureDevice>,
    backend: Arc<dyn AssistantBackend>,
    player: Arc<dyn PlaybackSink>,
    events: UnboundedSender<ControllerEvent>,
    request_timeout: Duration,
}

impl InteractionController {
    pub fn new(
        capture: Box<dyn CaptureDevice>,
        backend: Arc<dyn AssistantBackend>,
        player: Arc<dyn PlaybackSink>,
        request_timeout: Duration,
    ) -> (Self, UnboundedReceiver<ControllerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: StateCell::new(),
                transcript: Transcript::new(),
                capture,
                backend,
                player,
                events,
                request_timeout,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ControllerState {
        self.state.current()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The mic button: starts a recording when idle, stops and dispatches
    /// when recording, does nothing while a dispatch is outstanding.
    pub async fn toggle_voice(&mut self) {
        match self.state.current() {
            ControllerState::Idle => self.start_recording().await,
            ControllerState::Recording => self.stop_recording().await,
            ControllerState::Dispatching => {
                debug!("voice toggle ignored while dispatching");
            }
        }
    }

    /// Open a capture session. A failed acquisition is surfaced as an
    /// assistant message and leaves the controller idle.
    pub async fn start_recording(&mut self) {
        if !self.state.try_begin_recording() {
            debug!(state = %self.state.current(), "voice input ignored");
            return;
        }
        self.emit(ControllerEvent::StateChanged(ControllerState::Recording));

        if let Err(err) = self.capture.start().await {
            warn!(error = %err, "could not open capture session");
            self.state.abort_recording();
            let appended =
                self.transcript
                    .append(Role::Assistant, MessageStatus::Final, MIC_UNAVAILABLE);
            self.emit(ControllerEvent::MessageAppended(appended));
            self.emit(ControllerEvent::StateChanged(ControllerState::Idle));
        }
    }

    /// Close the capture session, append the pending placeholder and
    /// dispatch the utterance. No-op unless a recording is active.
    pub async fn stop_recording(&mut self) {
        if !self.state.try_take_recording() {
            debug!(state = %self.state.current(), "stop ignored, no active recording");
            return;
        }
        self.emit(ControllerEvent::StateChanged(ControllerState::Dispatching));

        match self.capture.stop().await {
            Ok(Some(audio)) => {
                if audio.is_empty() {
                    // Dispatched anyway; the backend reports what it heard.
                    debug!("finalized utterance is empty");
                }
                let pending = self.transcript.append(
                    Role::User,
                    MessageStatus::Pending,
                    PROCESSING_PLACEHOLDER,
                );
                self.emit(ControllerEvent::MessageAppended(pending.clone()));
                self.dispatch_voice(pending.id, audio).await;
            }
            Ok(None) => {
                warn!("capture session yielded no payload");
            }
            Err(err) => {
                error!(error = %err, "capture session failed to finalize");
                let appended =
                    self.transcript
                        .append(Role::Assistant, MessageStatus::Final, MIC_UNAVAILABLE);
                self.emit(ControllerEvent::MessageAppended(appended));
            }
        }

        self.state.finish_dispatch();
        self.emit(ControllerEvent::StateChanged(ControllerState::Idle));
    }

    /// Submit typed input. Rejected while recording or dispatching;
    /// empty input is dropped without a state change.
    pub async fn submit_text(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if !self.state.try_begin_dispatch() {
            debug!(state = %self.state.current(), "text input rejected");
            return;
        }
        self.emit(ControllerEvent::StateChanged(ControllerState::Dispatching));

        // Text input has no recognition step, so the user message is final
        // from the start.
        let user = self
            .transcript
            .append(Role::User, MessageStatus::Final, trimmed);
        self.emit(ControllerEvent::MessageAppended(user));

        // Dropping the request on expiry cancels it outright: there is no
        // pending placeholder on the text path, so nothing can arrive late.
        let outcome = match timeout(self.request_timeout, self.backend.send_text(trimmed)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        };
        match outcome {
            Ok(reply) => {
                let appended =
                    self.transcript
                        .append(Role::Assistant, MessageStatus::Final, reply.message);
                self.emit(ControllerEvent::MessageAppended(appended));
                if let Some(url) = reply.audio_url {
                    play_reply(&self.events, &self.player, &url).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "text dispatch failed");
                let appended =
                    self.transcript
                        .append(Role::Assistant, MessageStatus::Final, DISPATCH_APOLOGY);
                self.emit(ControllerEvent::MessageAppended(appended));
            }
        }

        self.state.finish_dispatch();
        self.emit(ControllerEvent::StateChanged(ControllerState::Idle));
    }

    /// Run one voice dispatch with a deadline. The request is spawned so
    /// it survives a timeout; whenever its result eventually lands, the
    /// pending-status check in the transcript decides whether it still
    /// applies or is stale and discarded.
    async fn dispatch_voice(&self, pending_id: Uuid, audio: RecordedAudio) {
        let backend = Arc::clone(&self.backend);
        let transcript = self.transcript.clone();
        let events = self.events.clone();
        let player = Arc::clone(&self.player);

        let mut request = tokio::spawn(async move {
            match backend.send_audio(audio).await {
                Ok(reply) => {
                    settle_voice_success(&transcript, &events, &player, pending_id, reply).await;
                }
                Err(err) => {
                    warn!(error = %err, "voice dispatch failed");
                    settle_voice_failure(&transcript, &events, pending_id);
                }
            }
        });

        match timeout(self.request_timeout, &mut request).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "voice dispatch task failed");
                settle_voice_failure(&self.transcript, &self.events, pending_id);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.request_timeout.as_secs(),
                    "voice dispatch timed out"
                );
                settle_voice_failure(&self.transcript, &self.events, pending_id);
            }
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // The receiver may be gone (headless tests); events are best-effort.
        let _ = self.events.send(event);
    }
}

async fn settle_voice_success(
    transcript: &Transcript,
    events: &UnboundedSender<ControllerEvent>,
    player: &Arc<dyn PlaybackSink>,
    pending_id: Uuid,
    reply: VoiceReply,
) {
    let Some(updated) =
        transcript.resolve_pending(pending_id, MessageStatus::Final, reply.recognized)
    else {
        debug!("stale voice reply discarded");
        return;
    };
    emit(events, ControllerEvent::MessageUpdated(updated));

    let appended = transcript.append(Role::Assistant, MessageStatus::Final, reply.message);
    emit(events, ControllerEvent::MessageAppended(appended));

    if let Some(url) = reply.audio_url {
        play_reply(events, player, &url).await;
    }
}

fn settle_voice_failure(
    transcript: &Transcript,
    events: &UnboundedSender<ControllerEvent>,
    pending_id: Uuid,
) {
    let Some(updated) =
        transcript.resolve_pending(pending_id, MessageStatus::Error, RECOGNITION_FAILED)
    else {
        debug!("stale voice failure discarded");
        return;
    };
    emit(events, ControllerEvent::MessageUpdated(updated));

    let appended = transcript.append(Role::Assistant, MessageStatus::Final, DISPATCH_APOLOGY);
    emit(events, ControllerEvent::MessageAppended(appended));
}

/// Playback only ever runs after the reply text is already in the
/// transcript; a playback failure is logged and otherwise dropped.
async fn play_reply(
    events: &UnboundedSender<ControllerEvent>,
    player: &Arc<dyn PlaybackSink>,
    url: &str,
) {
    emit(
        events,
        ControllerEvent::ReplyAudio {
            url: url.to_string(),
        },
    );
    if let Err(err) = player.play(url).await {
        warn!(error = %err, url, "reply playback failed");
    }
}

fn emit(events: &UnboundedSender<ControllerEvent>, event: ControllerEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::audio::capture::CaptureError;
    use crate::backend::TextReply;
    use crate::playback::PlaybackError;

    struct FakeCapture {
        fail_start: Option<CaptureError>,
        active: bool,
        starts: Arc<AtomicUsize>,
        payloads: Arc<AtomicUsize>,
    }

    impl FakeCapture {
        fn ok() -> Self {
            Self {
                fail_start: None,
                active: false,
                starts: Arc::new(AtomicUsize::new(0)),
                payloads: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn denied() -> Self {
            Self {
                fail_start: Some(CaptureError::PermissionDenied),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl CaptureDevice for FakeCapture {
        async fn start(&mut self) -> Result<(), CaptureError> {
            if let Some(err) = self.fail_start.take() {
                return Err(err);
            }
            self.active = true;
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> Result<Option<RecordedAudio>, CaptureError> {
            if self.active {
                self.active = false;
                self.payloads.fetch_add(1, Ordering::SeqCst);
                Ok(Some(RecordedAudio {
                    samples: vec![0.0; 160],
                    sample_rate: 16_000,
                }))
            } else {
                Ok(None)
            }
        }
    }

    /// Backend scripted with at most one result per kind; an unexpected
    /// dispatch panics the test.
    #[derive(Default)]
    struct FakeBackend {
        voice: Mutex<Option<Result<VoiceReply, DispatchError>>>,
        text: Mutex<Option<Result<TextReply, DispatchError>>>,
        delay: Option<Duration>,
    }

    impl FakeBackend {
        fn with_voice(result: Result<VoiceReply, DispatchError>) -> Self {
            Self {
                voice: Mutex::new(Some(result)),
                ..Default::default()
            }
        }

        fn with_text(result: Result<TextReply, DispatchError>) -> Self {
            Self {
                text: Mutex::new(Some(result)),
                ..Default::default()
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl AssistantBackend for FakeBackend {
        async fn send_audio(&self, _audio: RecordedAudio) -> Result<VoiceReply, DispatchError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.voice
                .lock()
                .unwrap()
                .take()
                .expect("unexpected voice dispatch")
        }

        async fn send_text(&self, _text: &str) -> Result<TextReply, DispatchError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.text
                .lock()
                .unwrap()
                .take()
                .expect("unexpected text dispatch")
        }
    }

    #[derive(Default)]
    struct FakePlayer {
        played: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlaybackSink for FakePlayer {
        async fn play(&self, url: &str) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn controller(
        capture: FakeCapture,
        backend: FakeBackend,
        player: Arc<FakePlayer>,
    ) -> (InteractionController, UnboundedReceiver<ControllerEvent>) {
        InteractionController::new(
            Box::new(capture),
            Arc::new(backend),
            player,
            Duration::from_secs(5),
        )
    }

    fn voice_reply(recognized: &str, message: &str, audio_url: Option<&str>) -> VoiceReply {
        VoiceReply {
            recognized: recognized.to_string(),
            message: message.to_string(),
            audio_url: audio_url.map(String::from),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn voice_round_trip_reconciles_pending() {
        let player = Arc::new(FakePlayer::default());
        let backend = FakeBackend::with_voice(Ok(voice_reply("bonjour", "salut", None)));
        let (mut ctl, _events) = controller(FakeCapture::ok(), backend, player.clone());

        ctl.toggle_voice().await;
        assert_eq!(ctl.state(), ControllerState::Recording);
        ctl.toggle_voice().await;

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].status, MessageStatus::Final);
        assert_eq!(messages[0].text, "bonjour");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].status, MessageStatus::Final);
        assert_eq!(messages[1].text, "salut");
        assert_eq!(ctl.state(), ControllerState::Idle);
        assert!(player.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_microphone_surfaces_assistant_error() {
        let player = Arc::new(FakePlayer::default());
        let (mut ctl, _events) =
            controller(FakeCapture::denied(), FakeBackend::default(), player);

        ctl.start_recording().await;

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].status, MessageStatus::Final);
        assert_eq!(messages[0].text, MIC_UNAVAILABLE);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn voice_dispatch_failure_marks_error_and_apologizes() {
        let player = Arc::new(FakePlayer::default());
        let backend = FakeBackend::with_voice(Err(DispatchError::Backend {
            status: 500,
            message: "boom".into(),
        }));
        let (mut ctl, _events) = controller(FakeCapture::ok(), backend, player);

        ctl.start_recording().await;
        ctl.stop_recording().await;

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].status, MessageStatus::Error);
        assert_eq!(messages[0].text, RECOGNITION_FAILED);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text, DISPATCH_APOLOGY);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn text_without_audio_never_touches_playback() {
        let player = Arc::new(FakePlayer::default());
        let backend = FakeBackend::with_text(Ok(TextReply {
            message: "Il est midi.".into(),
            audio_url: None,
        }));
        let (mut ctl, _events) = controller(FakeCapture::ok(), backend, player.clone());

        ctl.submit_text("quelle heure est-il").await;

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.status == MessageStatus::Final));
        assert_eq!(messages[0].text, "quelle heure est-il");
        assert_eq!(messages[1].text, "Il est midi.");
        assert!(player.played.lock().unwrap().is_empty());
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn text_is_rejected_while_recording() {
        let player = Arc::new(FakePlayer::default());
        let (mut ctl, _events) = controller(FakeCapture::ok(), FakeBackend::default(), player);

        ctl.start_recording().await;
        ctl.submit_text("bonjour").await;

        assert!(ctl.transcript().is_empty());
        assert_eq!(ctl.state(), ControllerState::Recording);
    }

    #[tokio::test]
    async fn reply_audio_plays_once_after_the_append() {
        let player = Arc::new(FakePlayer::default());
        let backend = FakeBackend::with_text(Ok(TextReply {
            message: "voilà".into(),
            audio_url: Some("/static/audio/r.mp3".into()),
        }));
        let (mut ctl, mut events) = controller(FakeCapture::ok(), backend, player.clone());

        ctl.submit_text("parle-moi").await;

        let played = player.played.lock().unwrap().clone();
        assert_eq!(played, vec!["/static/audio/r.mp3".to_string()]);

        let events = drain(&mut events);
        let append_idx = events
            .iter()
            .position(|e| {
                matches!(e, ControllerEvent::MessageAppended(m) if m.role == Role::Assistant)
            })
            .expect("assistant append event");
        let audio_idx = events
            .iter()
            .position(|e| matches!(e, ControllerEvent::ReplyAudio { .. }))
            .expect("reply audio event");
        assert!(append_idx < audio_idx, "playback must follow the append");
    }

    #[tokio::test]
    async fn double_stop_produces_exactly_one_payload() {
        let player = Arc::new(FakePlayer::default());
        let capture = FakeCapture::ok();
        let payloads = capture.payloads.clone();
        let backend = FakeBackend::with_voice(Ok(voice_reply("oui", "d'accord", None)));
        let (mut ctl, _events) = controller(capture, backend, player);

        ctl.start_recording().await;
        ctl.stop_recording().await;
        ctl.stop_recording().await;

        assert_eq!(payloads.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.transcript().len(), 2);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let player = Arc::new(FakePlayer::default());
        let capture = FakeCapture::ok();
        let starts = capture.starts.clone();
        let (mut ctl, _events) = controller(capture, FakeBackend::default(), player);

        ctl.start_recording().await;
        ctl.start_recording().await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.state(), ControllerState::Recording);
        assert!(ctl.transcript().is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_dropped_without_dispatch() {
        let player = Arc::new(FakePlayer::default());
        let (mut ctl, _events) = controller(FakeCapture::ok(), FakeBackend::default(), player);

        ctl.submit_text("   ").await;

        assert!(ctl.transcript().is_empty());
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_late_success_is_discarded() {
        let player = Arc::new(FakePlayer::default());
        let backend = FakeBackend::with_voice(Ok(voice_reply(
            "bonjour",
            "salut",
            Some("/static/audio/r.mp3"),
        )))
        .delayed(Duration::from_secs(60));
        let (mut ctl, _events) = controller(FakeCapture::ok(), backend, player.clone());

        ctl.start_recording().await;
        ctl.stop_recording().await;

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].status, MessageStatus::Error);
        assert_eq!(messages[0].text, RECOGNITION_FAILED);
        assert_eq!(messages[1].text, DISPATCH_APOLOGY);
        assert_eq!(ctl.state(), ControllerState::Idle);

        // Let the detached request deliver its late success.
        tokio::time::sleep(Duration::from_secs(120)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let messages = ctl.transcript().snapshot();
        assert_eq!(messages.len(), 2, "late reply must not be applied");
        assert_eq!(messages[0].status, MessageStatus::Error);
        assert!(player.played.lock().unwrap().is_empty());
    }
}
