//! **SessionController**: the Captain's main loop.
//!
//! Owns the microphone, the transcription session and the background workers, applies the
//! Running / Paused / Idle state machine and tears everything down on quit.
//!
//! Threads: the transcription stream runs on a blocking task and delivers events from its
//! own threads; commands arrive on the runtime. All shared state goes through
//! [`SessionState`] or the workers' own locks.

use crate::commands::{run_command_loop, Command, HELP_TEXT};
use crate::config::{AgentConfig, Secrets};
use crate::error::AgentResult;
use crate::llm::ChatClient;
use crate::persona::ChatPersona;
use crate::responder::{ResponseWorker, SpeechResponder};
use crate::state::{Mode, SessionState};
use crate::vision::{PhotoRefresher, ProcessVision, UserDescription};
use boneheart_voice::{
    create_best_stt, AudioOutput, ClipPlayer, ElevenLabsTts, IdlePlayer, MutableMicStream,
    PlaceholderTts, SpeechPlayer, SpeechSynthesizer, TranscriptEvent, TranscriptHandler,
    TranscriptionSession, TurnTranscriber, VoiceError,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How long teardown waits for an in-flight reply.
const RESPONSE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the controller owns, built by [`build_session`] or by tests.
pub struct SessionParts {
    pub state: SessionState,
    pub mic: MutableMicStream,
    pub transcriber: Arc<dyn TranscriptionSession>,
    pub responses: ResponseWorker,
    pub photos: PhotoRefresher,
    pub description: UserDescription,
    pub idle: IdlePlayer,
    pub output: Option<Arc<AudioOutput>>,
}

pub struct SessionController {
    state: SessionState,
    mic: MutableMicStream,
    transcriber: Arc<dyn TranscriptionSession>,
    responses: ResponseWorker,
    photos: PhotoRefresher,
    description: UserDescription,
    idle: IdlePlayer,
    output: Option<Arc<AudioOutput>>,
    transcript: Mutex<Vec<String>>,
    resets: AtomicUsize,
    quit_tx: watch::Sender<bool>,
    cleaned: AtomicBool,
}

impl SessionController {
    pub fn new(parts: SessionParts) -> Arc<Self> {
        let (quit_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: parts.state,
            mic: parts.mic,
            transcriber: parts.transcriber,
            responses: parts.responses,
            photos: parts.photos,
            description: parts.description,
            idle: parts.idle,
            output: parts.output,
            transcript: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            quit_tx,
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Flips to `true` once quit has been requested.
    pub fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit_tx.subscribe()
    }

    pub fn mic(&self) -> &MutableMicStream {
        &self.mic
    }

    pub fn idle(&self) -> &IdlePlayer {
        &self.idle
    }

    pub fn photos(&self) -> &PhotoRefresher {
        &self.photos
    }

    pub fn responses(&self) -> &ResponseWorker {
        &self.responses
    }

    pub fn description(&self) -> &UserDescription {
        &self.description
    }

    /// Final user utterances since the last restart.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// How many times the conversation has been reset.
    pub fn conversation_resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Handle one transcript event. Ignored entirely while paused or idle.
    pub fn on_transcript(&self, event: TranscriptEvent) {
        if !self.state.accepts_transcripts() {
            return;
        }
        self.photos.start();

        if !event.has_text() {
            return;
        }
        let text = event.text.trim().to_string();
        if !event.is_final {
            info!("… {}", text);
            return;
        }

        info!("User said: {}", text);
        self.transcript.lock().push(text.clone());
        self.responses.dispatch(text, self.description.get());
    }

    pub fn toggle_pause(&self) {
        match self.state.toggle_pause() {
            Some(Mode::Paused) => {
                self.mic.mute();
                info!("🏴‍☠️ Pirate PAUSED - Press 'p' to resume, 'q' to quit");
            }
            Some(_) => {
                self.mic.unmute();
                info!("🏴‍☠️ Pirate RESUMED - Press 'p' to pause, 'q' to quit");
            }
            None => info!("Pause ignored in idle mode; press 'i' to wake the Captain"),
        }
    }

    /// Mute, stop conversing and play idle clips.
    pub fn activate_idle(&self) {
        if !self.state.enter_idle() {
            debug!("Already in idle mode");
            return;
        }
        info!("💤 Entering idle mode");
        self.mic.mute();
        self.idle.start();
    }

    /// Leave idle mode into a fresh conversation.
    pub async fn deactivate_idle(&self) {
        // Paused until the reset is done so no transcript lands in the old conversation.
        if !self.state.transition(Mode::Idle, Mode::Paused) {
            return;
        }
        self.idle.stop().await;
        self.restart_dialog();
        self.mic.unmute();
        self.state.transition(Mode::Paused, Mode::Running);
        info!("🏴‍☠️ Idle mode off - the Captain is listening");
    }

    pub async fn toggle_idle(&self) {
        if self.state.is_idle() {
            self.deactivate_idle().await;
        } else {
            self.activate_idle();
        }
    }

    /// Forget history, description and transcript.
    pub fn restart_dialog(&self) {
        info!("🏴‍☠️ Restarting Pirate Dialog - Starting fresh conversation");
        self.description.clear();
        self.transcript.lock().clear();
        self.responses.reset();
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop the session: the stream ends at the next chunk.
    pub fn request_quit(&self) {
        if !self.state.request_quit() {
            return;
        }
        info!("Quitting...");
        self.quit_tx.send_replace(true);
        self.transcriber.close();
        self.mic.close();
    }

    pub async fn handle_command(&self, command: Command) {
        match command {
            Command::TogglePause => self.toggle_pause(),
            Command::ToggleIdle => self.toggle_idle().await,
            Command::Restart => self.restart_dialog(),
            Command::Quit => self.request_quit(),
            Command::Help => info!("{}", HELP_TEXT),
        }
    }

    /// Stream the microphone until quit. Returns the user's transcript.
    pub async fn run(
        self: &Arc<Self>,
        lines: mpsc::UnboundedReceiver<io::Result<String>>,
    ) -> AgentResult<String> {
        info!("🏴‍☠️ Starting Pirate Agent... 'p' pause/resume, 'i' idle mode, 'r' restart, 'q' quit");
        tokio::spawn(run_command_loop(Arc::clone(self), lines));
        tokio::spawn(watch_interrupt(Arc::clone(self)));

        if let Err(e) = self.transcriber.connect() {
            error!("Could not connect transcription session: {}", e);
            self.request_quit();
            return Err(e.into());
        }

        let this = Arc::clone(self);
        let streamed = tokio::task::spawn_blocking(move || {
            let mut source = this.mic.clone();
            this.transcriber.stream(&mut source, &*this)
        })
        .await;
        self.request_quit();

        match streamed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Error in transcribe: {}", e);
                return Err(e.into());
            }
            Err(e) => error!("Transcription task failed: {}", e),
        }
        Ok(self.transcript().join(" "))
    }

    /// Release everything. Each step is independent; safe to call more than once.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Cleaning up resources...");
        self.state.request_quit();
        self.quit_tx.send_replace(true);

        teardown_step("transcriber", || self.transcriber.close());
        teardown_step("microphone", || self.mic.close());
        if self.idle.is_active() {
            teardown_step_async("idle player", self.idle.stop()).await;
        }
        teardown_step_async("photo refresher", self.photos.stop()).await;
        if let Some(output) = &self.output {
            teardown_step("audio output", || output.terminate());
        }
        teardown_step_async("response worker", async {
            self.responses.join(RESPONSE_JOIN_TIMEOUT).await;
        })
        .await;
        info!("Cleanup complete");
    }
}

impl TranscriptHandler for SessionController {
    fn on_open(&self, session_id: &str) {
        info!("Session ID: {}", session_id);
    }

    fn on_transcript(&self, event: TranscriptEvent) {
        SessionController::on_transcript(self, event);
    }

    fn on_error(&self, error: &VoiceError) {
        error!("An error occurred: {}", error);
    }

    fn on_close(&self) {
        info!("Closing Session");
    }
}

fn teardown_step(name: &str, step: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(step)).is_err() {
        error!("Error during teardown of {}; continuing", name);
    }
}

async fn teardown_step_async(name: &str, step: impl Future<Output = ()>) {
    if AssertUnwindSafe(step).catch_unwind().await.is_err() {
        error!("Error during teardown of {}; continuing", name);
    }
}

async fn watch_interrupt(controller: Arc<SessionController>) {
    let mut quit = controller.quit_signal();
    if !controller.is_running() {
        return;
    }
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                info!("Interrupt received, shutting down gracefully...");
                controller.request_quit();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        },
        _ = quit.changed() => {}
    }
}

/// Wire the real collaborators. Microphone and LLM failures are fatal; missing speech,
/// STT or playback fall back to silent/placeholder backends.
pub fn build_session(
    config: &AgentConfig,
    secrets: &Secrets,
    runtime: Handle,
) -> AgentResult<Arc<SessionController>> {
    let chat = ChatClient::new(
        config.llm_api_url.as_str(),
        secrets.require_llm_key()?,
        config.llm_model.as_str(),
    )?;
    info!(model = chat.model(), "Persona model ready");

    let mic = MutableMicStream::open(&config.audio()).map_err(|e| {
        error!("Make sure your microphone is connected and permissions are granted");
        e
    })?;

    let transcriber: Arc<dyn TranscriptionSession> = Arc::new(TurnTranscriber::new(
        Arc::from(create_best_stt()),
        config.turns(),
    ));

    let output = match AudioOutput::new() {
        Ok(output) => Some(Arc::new(output)),
        Err(e) => {
            warn!("Audio output unavailable, replies will be silent: {}", e);
            None
        }
    };

    let tts: Arc<dyn SpeechSynthesizer> = match ElevenLabsTts::from_env(config.voice_id.as_str()) {
        Ok(tts) => Arc::new(tts),
        Err(e) => {
            warn!("Speech synthesis disabled: {}", e);
            Arc::new(PlaceholderTts)
        }
    };
    let speech_player = output.clone().map(|o| o as Arc<dyn SpeechPlayer>);
    let responder = SpeechResponder::new(Arc::new(ChatPersona::new(chat)), tts, speech_player);
    let responses = ResponseWorker::new(Arc::new(responder), runtime.clone());

    let state = SessionState::new();
    let description = UserDescription::default();
    let photos = PhotoRefresher::new(
        Arc::new(ProcessVision::current_exe()?),
        description.clone(),
        state.clone(),
        config.photo_interval(),
        config.vision_timeout(),
        runtime.clone(),
    );

    let clip_player = output.clone().map(|o| o as Arc<dyn ClipPlayer>);
    let idle = IdlePlayer::new(&config.idle(), clip_player, runtime);

    Ok(SessionController::new(SessionParts {
        state,
        mic,
        transcriber,
        responses,
        photos,
        description,
        idle,
        output,
    }))
}
