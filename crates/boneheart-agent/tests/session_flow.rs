//! Session-level behaviour with every external collaborator faked: no microphone, camera,
//! LLM or speaker is touched.

use async_trait::async_trait;
use boneheart_agent::vision::refresh_once;
use boneheart_agent::{
    run_command_loop, AgentError, AgentResult, Mode, PersonaModel, PhotoRefresher,
    ResponseWorker, SessionController, SessionParts, SessionState, SpeechResponder, Turn,
    UserDescription, VisionAnalyzer,
};
use boneheart_voice::{
    AudioConfig, CaptureDevice, ClipPlayer, IdleConfig, IdleLibrary, IdlePlayer,
    MutableMicStream, PlaceholderTts, TranscriptEvent, TranscriptHandler, TranscriptionSession,
    VoiceResult,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};

struct SilentDevice;

impl CaptureDevice for SilentDevice {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> VoiceResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn close(&mut self) {}
}

/// Replays a fixed list of events, then ends the stream.
#[derive(Default)]
struct ScriptedTranscriber {
    events: Vec<TranscriptEvent>,
    closes: AtomicUsize,
}

impl TranscriptionSession for ScriptedTranscriber {
    fn connect(&self) -> VoiceResult<()> {
        Ok(())
    }

    fn stream(
        &self,
        _source: &mut dyn Iterator<Item = Vec<u8>>,
        handler: &dyn TranscriptHandler,
    ) -> VoiceResult<()> {
        handler.on_open("scripted");
        for event in &self.events {
            handler.on_transcript(event.clone());
        }
        handler.on_close();
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeClips {
    stops: AtomicUsize,
}

impl ClipPlayer for FakeClips {
    fn start(&self, _path: &Path) -> VoiceResult<()> {
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn stop(&self) -> VoiceResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct EchoPersona;

#[async_trait]
impl PersonaModel for EchoPersona {
    async fn reply(&self, _history: &[Turn], user_text: &str, _desc: &str) -> AgentResult<String> {
        Ok(format!("Arr, {}", user_text))
    }
}

/// Holds every reply until released.
struct GatedPersona {
    calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl PersonaModel for GatedPersona {
    async fn reply(&self, _history: &[Turn], user_text: &str, _desc: &str) -> AgentResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(format!("Arr, {}", user_text))
    }
}

struct BlindVision;

#[async_trait]
impl VisionAnalyzer for BlindVision {
    async fn capture_and_describe(&self) -> AgentResult<String> {
        Err(AgentError::Vision("lens cap on".to_string()))
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never answers; records when its future is dropped.
struct HangingVision {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl VisionAnalyzer for HangingVision {
    async fn capture_and_describe(&self) -> AgentResult<String> {
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending::<AgentResult<String>>().await
    }
}

/// Transcriber whose `close` panics.
struct BrokenTranscriber;

impl TranscriptionSession for BrokenTranscriber {
    fn connect(&self) -> VoiceResult<()> {
        Ok(())
    }

    fn stream(
        &self,
        _source: &mut dyn Iterator<Item = Vec<u8>>,
        _handler: &dyn TranscriptHandler,
    ) -> VoiceResult<()> {
        Ok(())
    }

    fn close(&self) {
        panic!("transcriber close exploded");
    }
}

/// Clip player whose `stop` panics.
struct BrokenClips;

impl ClipPlayer for BrokenClips {
    fn start(&self, _path: &Path) -> VoiceResult<()> {
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn stop(&self) -> VoiceResult<()> {
        panic!("clip stop exploded");
    }
}

struct Harness {
    controller: Arc<SessionController>,
    transcriber: Arc<ScriptedTranscriber>,
    clips: Arc<FakeClips>,
}

fn controller_with(
    persona: Arc<dyn PersonaModel>,
    transcriber: Arc<dyn TranscriptionSession>,
    clip_player: Arc<dyn ClipPlayer>,
) -> Arc<SessionController> {
    let runtime = Handle::current();
    let state = SessionState::new();
    let description = UserDescription::default();

    let responder = SpeechResponder::new(persona, Arc::new(PlaceholderTts), None);
    let idle_config = IdleConfig {
        audio_dir: PathBuf::from("unused"),
        min_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(2),
    };

    SessionController::new(SessionParts {
        state: state.clone(),
        mic: MutableMicStream::with_device(Box::new(SilentDevice), &AudioConfig::default()),
        transcriber,
        responses: ResponseWorker::new(Arc::new(responder), runtime.clone()),
        photos: PhotoRefresher::new(
            Arc::new(BlindVision),
            description.clone(),
            state,
            Duration::from_secs(30),
            Duration::from_secs(15),
            runtime.clone(),
        ),
        description,
        idle: IdlePlayer::with_library(
            IdleLibrary::from_files(Vec::new()),
            &idle_config,
            Some(clip_player),
            runtime,
        ),
        output: None,
    })
}

fn harness(persona: Arc<dyn PersonaModel>, events: Vec<TranscriptEvent>) -> Harness {
    let transcriber = Arc::new(ScriptedTranscriber {
        events,
        closes: AtomicUsize::new(0),
    });
    let clips = Arc::new(FakeClips::default());
    let controller = controller_with(persona, transcriber.clone(), clips.clone());
    Harness {
        controller,
        transcriber,
        clips,
    }
}

#[tokio::test]
async fn idle_round_trip_starts_a_fresh_conversation() {
    let h = harness(Arc::new(EchoPersona), Vec::new());
    let controller = &h.controller;

    controller.on_transcript(TranscriptEvent::final_text("ahoy"));
    assert_eq!(
        controller.responses().join(Duration::from_secs(5)).await.as_deref(),
        Some("Arr, ahoy")
    );
    assert_eq!(controller.responses().responder().history().len(), 2);
    controller.description().set("a tall stranger in a red coat");

    controller.handle_command(boneheart_agent::Command::ToggleIdle).await;
    assert_eq!(controller.mode(), Mode::Idle);
    assert!(controller.idle().is_active());
    assert!(controller.mic().is_muted());

    controller.handle_command(boneheart_agent::Command::ToggleIdle).await;
    assert_eq!(controller.mode(), Mode::Running);
    assert!(!controller.idle().is_active());
    assert!(!controller.mic().is_muted());
    assert!(h.clips.stops.load(Ordering::SeqCst) >= 1);
    assert_eq!(controller.conversation_resets(), 1);
    assert!(controller.responses().responder().history().is_empty());
    assert!(controller.description().get().is_empty());
    assert!(controller.transcript().is_empty());

    controller.cleanup().await;
}

#[tokio::test]
async fn paused_session_ignores_transcripts() {
    let h = harness(Arc::new(EchoPersona), Vec::new());
    let controller = &h.controller;

    controller.toggle_pause();
    assert_eq!(controller.mode(), Mode::Paused);
    assert!(controller.mic().is_muted());

    controller.on_transcript(TranscriptEvent::final_text("anyone there?"));
    assert!(controller.transcript().is_empty());
    assert!(!controller.responses().is_busy());
    assert!(!controller.photos().is_running());

    controller.toggle_pause();
    assert_eq!(controller.mode(), Mode::Running);
    assert!(!controller.mic().is_muted());

    controller.cleanup().await;
}

#[tokio::test]
async fn pause_is_ignored_while_idle() {
    let h = harness(Arc::new(EchoPersona), Vec::new());
    let controller = &h.controller;

    controller.activate_idle();
    controller.toggle_pause();
    assert_eq!(controller.mode(), Mode::Idle);
    assert!(controller.mic().is_muted());

    controller.cleanup().await;
    assert!(!controller.idle().is_active());
}

#[tokio::test]
async fn utterances_during_a_reply_are_dropped() {
    let persona = Arc::new(GatedPersona {
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let h = harness(persona.clone(), Vec::new());
    let controller = &h.controller;

    controller.on_transcript(TranscriptEvent::final_text("first"));
    controller.on_transcript(TranscriptEvent::final_text("second"));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(persona.calls.load(Ordering::SeqCst), 1);
    assert!(controller.responses().is_busy());

    persona.release.notify_one();
    assert_eq!(
        controller.responses().join(Duration::from_secs(5)).await.as_deref(),
        Some("Arr, first")
    );
    assert_eq!(
        controller.responses().responder().history(),
        vec![Turn::user("first"), Turn::assistant("Arr, first")]
    );
    assert_eq!(controller.transcript(), vec!["first", "second"]);

    controller.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn hung_vision_worker_times_out_and_is_dropped() {
    let dropped = Arc::new(AtomicBool::new(false));
    let analyzer = Arc::new(HangingVision {
        dropped: Arc::clone(&dropped),
    });
    let description = UserDescription::default();
    description.set("a one-eyed parrot keeper");

    let start = tokio::time::Instant::now();
    assert!(!refresh_once(analyzer, &description, Duration::from_secs(15)).await);
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    assert_eq!(description.get(), "a one-eyed parrot keeper");

    for _ in 0..10 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn run_returns_the_final_transcript() {
    let events = vec![
        TranscriptEvent::partial("where be"),
        TranscriptEvent::final_text("where be the treasure"),
        TranscriptEvent::partial("   "),
    ];
    let h = harness(Arc::new(EchoPersona), events);
    let (_tx, rx) = mpsc::unbounded_channel();

    let transcript = h.controller.run(rx).await.unwrap();
    assert_eq!(transcript, "where be the treasure");
    assert!(!h.controller.is_running());
    assert!(*h.controller.quit_signal().borrow());

    h.controller.cleanup().await;
}

#[tokio::test]
async fn commands_apply_until_input_closes() {
    let h = harness(Arc::new(EchoPersona), Vec::new());
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Ok("p".to_string())).unwrap();
    tx.send(Ok("arr".to_string())).unwrap();
    drop(tx);

    run_command_loop(Arc::clone(&h.controller), rx).await;
    assert_eq!(h.controller.mode(), Mode::Paused);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn quit_and_cleanup_are_idempotent() {
    let h = harness(Arc::new(EchoPersona), Vec::new());
    let controller = &h.controller;

    controller.request_quit();
    controller.request_quit();
    assert_eq!(h.transcriber.closes.load(Ordering::SeqCst), 1);
    assert!(!controller.mic().is_open());

    controller.cleanup().await;
    controller.cleanup().await;
    assert_eq!(h.transcriber.closes.load(Ordering::SeqCst), 2);
    assert!(!controller.photos().is_running());

    controller.on_transcript(TranscriptEvent::final_text("too late"));
    assert!(controller.transcript().is_empty());
}

#[tokio::test]
async fn reply_in_flight_across_idle_does_not_reach_the_new_conversation() {
    let persona = Arc::new(GatedPersona {
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let h = harness(persona.clone(), Vec::new());
    let controller = &h.controller;

    controller.on_transcript(TranscriptEvent::final_text("old news"));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(persona.calls.load(Ordering::SeqCst), 1);

    controller.handle_command(boneheart_agent::Command::ToggleIdle).await;
    controller.handle_command(boneheart_agent::Command::ToggleIdle).await;
    assert_eq!(controller.mode(), Mode::Running);
    assert_eq!(controller.conversation_resets(), 1);

    persona.release.notify_one();
    assert_eq!(
        controller.responses().join(Duration::from_secs(5)).await.as_deref(),
        Some("Arr, old news")
    );
    assert!(controller.responses().responder().history().is_empty());

    controller.cleanup().await;
}

#[tokio::test]
async fn teardown_continues_past_panicking_steps() {
    let controller = controller_with(
        Arc::new(EchoPersona),
        Arc::new(BrokenTranscriber),
        Arc::new(BrokenClips),
    );

    controller.on_transcript(TranscriptEvent::partial("hello"));
    assert!(controller.photos().is_running());
    controller.activate_idle();
    assert!(controller.idle().is_active());

    controller.cleanup().await;
    assert!(!controller.mic().is_open());
    assert!(!controller.idle().is_active());
    assert!(!controller.photos().is_running());
    assert!(!controller.is_running());
}
