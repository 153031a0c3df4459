//! Reply generation and speech, one utterance at a time.
//!
//! [`SpeechResponder`] turns a final transcript into a persona reply and plays it.
//! [`ResponseWorker`] runs it in the background with a one-in-flight guard: a new
//! utterance that arrives while the Captain is still answering is dropped, not queued.

use crate::persona::{PersonaModel, Turn};
use boneheart_voice::{SpeechPlayer, SpeechSynthesizer};
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reply used when every generation attempt fails.
pub const FALLBACK_REPLY: &str = "Arr, me brain be foggy today, matey! Try again later.";

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Run `op` up to [`MAX_ATTEMPTS`] times, sleeping [`RETRY_BACKOFF`] between attempts.
/// Returns the last error if every attempt fails.
pub async fn with_retry<T, E, F, Fut>(what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(attempt, max = MAX_ATTEMPTS, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(RETRY_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => {
                error!(attempt, error = %e, "{} failed after {} attempts", what, MAX_ATTEMPTS);
                return Err(e);
            }
        }
    }
}

/// Conversation history. Turns are appended in (user, assistant) pairs.
///
/// Every `clear` starts a new generation; a pair produced for an older generation is
/// discarded instead of leaking into the fresh conversation.
#[derive(Default)]
pub struct Conversation {
    inner: Mutex<History>,
}

#[derive(Default)]
struct History {
    turns: Vec<Turn>,
    generation: u64,
}

impl Conversation {
    pub fn snapshot(&self) -> Vec<Turn> {
        self.inner.lock().turns.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Append the pair unless the conversation was cleared since `generation`.
    pub fn record(&self, generation: u64, user_text: &str, reply: &str) -> bool {
        let mut history = self.inner.lock();
        if history.generation != generation {
            return false;
        }
        history.turns.push(Turn::user(user_text));
        history.turns.push(Turn::assistant(reply));
        true
    }

    pub fn clear(&self) {
        let mut history = self.inner.lock();
        history.turns.clear();
        history.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().turns.is_empty()
    }
}

/// Persona reply + speech for one utterance. Never fails: external errors become the
/// fallback reply or a silent response.
pub struct SpeechResponder {
    persona: Arc<dyn PersonaModel>,
    tts: Arc<dyn SpeechSynthesizer>,
    player: Option<Arc<dyn SpeechPlayer>>,
    conversation: Conversation,
}

impl SpeechResponder {
    pub fn new(
        persona: Arc<dyn PersonaModel>,
        tts: Arc<dyn SpeechSynthesizer>,
        player: Option<Arc<dyn SpeechPlayer>>,
    ) -> Self {
        Self {
            persona,
            tts,
            player,
            conversation: Conversation::default(),
        }
    }

    /// Generate, record and speak a reply. Returns the generated text.
    pub async fn respond(&self, user_text: &str, user_description: &str) -> String {
        self.respond_in(self.generation(), user_text, user_description)
            .await
    }

    /// Like [`respond`](Self::respond), for the conversation as it was at `generation`.
    /// If the conversation is reset meanwhile, the reply is neither recorded nor spoken.
    pub async fn respond_in(&self, generation: u64, user_text: &str, user_description: &str) -> String {
        info!("Generating response for: {}", user_text);
        let reply = self.generate_reply(user_text, user_description).await;
        if !self.conversation.record(generation, user_text, &reply) {
            info!("Conversation was restarted; discarding reply to: {}", user_text);
            return reply;
        }
        info!("🏴‍☠️ Pirate responds: {}", reply);

        let Some(audio) = self.synthesize(&reply).await else {
            return reply;
        };
        if self.conversation.generation() != generation {
            info!("Conversation was restarted; not speaking stale reply");
            return reply;
        }
        self.play(audio).await;
        reply
    }

    /// Current conversation generation; bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.conversation.generation()
    }

    /// Persona reply with retry; [`FALLBACK_REPLY`] once attempts are exhausted.
    pub async fn generate_reply(&self, user_text: &str, user_description: &str) -> String {
        let history = self.conversation.snapshot();
        match with_retry("Persona reply", || {
            self.persona.reply(&history, user_text, user_description)
        })
        .await
        {
            Ok(reply) => reply,
            Err(_) => FALLBACK_REPLY.to_string(),
        }
    }

    /// Speech audio with retry; `None` once attempts are exhausted or nothing to play.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        with_retry("Speech synthesis", || self.tts.synthesize(text))
            .await
            .unwrap_or(None)
    }

    async fn play(&self, audio: Vec<u8>) {
        let Some(player) = self.player.clone() else {
            debug!("No audio output; skipping playback");
            return;
        };
        match tokio::task::spawn_blocking(move || player.play(&audio)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Speech playback failed: {}", e),
            Err(e) => warn!("Speech playback task failed: {}", e),
        }
    }

    pub fn history(&self) -> Vec<Turn> {
        self.conversation.snapshot()
    }

    /// Forget the conversation.
    pub fn reset(&self) {
        self.conversation.clear();
    }
}

/// Clears the in-flight flag when the response task ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Background runner for [`SpeechResponder`], at most one response at a time.
pub struct ResponseWorker {
    responder: Arc<SpeechResponder>,
    in_flight: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<String>>>,
    runtime: Handle,
}

impl ResponseWorker {
    pub fn new(responder: Arc<SpeechResponder>, runtime: Handle) -> Self {
        Self {
            responder,
            in_flight: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            runtime,
        }
    }

    /// Start a response unless one is already running. Returns whether it started.
    pub fn dispatch(&self, user_text: String, user_description: String) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Pirate is still speaking; dropping utterance");
            return false;
        }

        let guard = InFlight(Arc::clone(&self.in_flight));
        let responder = Arc::clone(&self.responder);
        let generation = responder.generation();
        let task = self.runtime.spawn(async move {
            let _guard = guard;
            responder
                .respond_in(generation, &user_text, &user_description)
                .await
        });
        *self.task.lock() = Some(task);
        true
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn responder(&self) -> &Arc<SpeechResponder> {
        &self.responder
    }

    /// Forget the conversation.
    pub fn reset(&self) {
        self.responder.reset();
    }

    /// Wait up to `timeout` for the current response. `None` if nothing finished in time.
    pub async fn join(&self, timeout: Duration) -> Option<String> {
        let task = self.task.lock().take()?;
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!("Response task failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Response still running after {:?}; leaving it", timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, AgentResult};
    use async_trait::async_trait;
    use boneheart_voice::{PlaceholderTts, VoiceError, VoiceResult};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    struct FlakyPersona {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl PersonaModel for FlakyPersona {
        async fn reply(&self, history: &[Turn], user_text: &str, _desc: &str) -> AgentResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AgentError::Llm("503".to_string()));
            }
            Ok(format!("Arr, {} ({} turns)", user_text, history.len()))
        }
    }

    struct FailingTts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for FailingTts {
        async fn synthesize(&self, _text: &str) -> VoiceResult<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(VoiceError::Tts("quota".to_string()))
        }
    }

    fn responder(failures: usize) -> (SpeechResponder, Arc<FlakyPersona>) {
        let persona = Arc::new(FlakyPersona {
            calls: AtomicUsize::new(0),
            failures,
        });
        let responder = SpeechResponder::new(persona.clone(), Arc::new(PlaceholderTts), None);
        (responder, persona)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let (responder, persona) = responder(2);
        let start = Instant::now();
        let reply = responder.generate_reply("ahoy", "").await;
        assert_eq!(reply, "Arr, ahoy (0 turns)");
        assert_eq!(persona.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), RETRY_BACKOFF * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_use_fallback_and_record_it() {
        let (responder, persona) = responder(usize::MAX);
        let reply = responder.respond("ahoy", "").await;
        assert_eq!(reply, FALLBACK_REPLY);
        assert_eq!(persona.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            responder.history(),
            vec![Turn::user("ahoy"), Turn::assistant(FALLBACK_REPLY)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn speech_failure_yields_no_audio() {
        let tts = Arc::new(FailingTts {
            calls: AtomicUsize::new(0),
        });
        let persona = Arc::new(FlakyPersona {
            calls: AtomicUsize::new(0),
            failures: 0,
        });
        let responder = SpeechResponder::new(persona, tts.clone(), None);
        assert!(responder.synthesize("Arr").await.is_none());
        assert_eq!(tts.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn history_grows_in_pairs_and_resets() {
        let (responder, _) = responder(0);
        responder.respond("one", "").await;
        let second = responder.respond("two", "").await;
        assert_eq!(second, "Arr, two (2 turns)");
        assert_eq!(responder.history().len(), 4);
        responder.reset();
        assert!(responder.history().is_empty());
    }

    #[tokio::test]
    async fn worker_releases_guard_after_completion() {
        let (responder, _) = responder(0);
        let worker = ResponseWorker::new(Arc::new(responder), Handle::current());
        assert!(worker.dispatch("ahoy".into(), String::new()));
        assert_eq!(worker.join(Duration::from_secs(5)).await.as_deref(), Some("Arr, ahoy (0 turns)"));
        assert!(!worker.is_busy());
        assert!(worker.dispatch("again".into(), String::new()));
        worker.join(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn reply_from_before_a_reset_is_discarded() {
        let (responder, _) = responder(0);
        let stale = responder.generation();
        responder.reset();
        let reply = responder.respond_in(stale, "old", "").await;
        assert_eq!(reply, "Arr, old (0 turns)");
        assert!(responder.history().is_empty());

        responder.respond("new", "").await;
        assert_eq!(responder.history().len(), 2);
    }
}
