//! Transcription session contract and the local, turn-based implementation.
//!
//! A [`TranscriptionSession`] pulls audio chunks from a source and reports
//! [`TranscriptEvent`]s to a [`TranscriptHandler`]. The handler may be invoked from any
//! thread; implementations synchronise their own state.

use crate::error::{VoiceError, VoiceResult};
use crate::stt::SttBackend;
use crate::turn::{TurnConfig, TurnEvent, TurnManager, Utterance};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One transcript update from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    /// `true` once the utterance has ended; partial events are display-only.
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// Whether the event carries any non-whitespace text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Receiver for session notifications.
pub trait TranscriptHandler: Send + Sync {
    fn on_open(&self, session_id: &str) {
        info!(session_id, "Transcription session opened");
    }

    fn on_transcript(&self, event: TranscriptEvent);

    fn on_error(&self, error: &VoiceError) {
        warn!(error = %error, "Transcription error");
    }

    fn on_close(&self) {
        info!("Transcription session closed");
    }
}

/// A streaming transcription session: `connect`, then `stream` until the source ends
/// or `close` is called from another thread.
pub trait TranscriptionSession: Send + Sync {
    fn connect(&self) -> VoiceResult<()>;

    /// Consume `source` until it ends or the session is closed. Blocks the calling thread.
    fn stream(
        &self,
        source: &mut dyn Iterator<Item = Vec<u8>>,
        handler: &dyn TranscriptHandler,
    ) -> VoiceResult<()>;

    /// End the session. Safe to call more than once.
    fn close(&self);
}

enum Job {
    Started,
    Transcribe(Utterance),
}

/// Local session: gap-based turn detection over the gated source, STT per utterance.
///
/// Chunks are 16-bit LE PCM. The amplitude gate upstream zeroes quiet chunks, so any
/// non-zero sample counts as speech.
pub struct TurnTranscriber {
    stt: Arc<dyn SttBackend>,
    turn_config: TurnConfig,
    session_id: String,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl TurnTranscriber {
    pub fn new(stt: Arc<dyn SttBackend>, turn_config: TurnConfig) -> Self {
        Self {
            stt,
            turn_config,
            session_id: Uuid::new_v4().to_string(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn chunk_to_samples(chunk: &[u8]) -> Vec<i16> {
    chunk
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

impl TranscriptionSession for TurnTranscriber {
    fn connect(&self) -> VoiceResult<()> {
        if self.is_closed() {
            return Err(VoiceError::Transcription("session already closed".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(session_id = %self.session_id, "Transcriber connected");
        Ok(())
    }

    fn stream(
        &self,
        source: &mut dyn Iterator<Item = Vec<u8>>,
        handler: &dyn TranscriptHandler,
    ) -> VoiceResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(VoiceError::Transcription(
                "stream() called before connect()".to_string(),
            ));
        }

        handler.on_open(&self.session_id);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let stt = Arc::clone(&self.stt);

        thread::scope(|scope| {
            // STT runs off the capture path; one queue keeps events in arrival order.
            scope.spawn(move || {
                for job in job_rx {
                    match job {
                        Job::Started => handler.on_transcript(TranscriptEvent::partial("")),
                        Job::Transcribe(utterance) => match stt.transcribe(&utterance) {
                            Ok(text) => {
                                let text = text.trim().to_string();
                                if !text.is_empty() {
                                    handler.on_transcript(TranscriptEvent::final_text(text));
                                }
                            }
                            Err(e) => handler.on_error(&e),
                        },
                    }
                }
            });

            let mut turns = TurnManager::new(self.turn_config.clone());
            for chunk in &mut *source {
                if self.is_closed() {
                    break;
                }
                let samples = chunk_to_samples(&chunk);
                let is_speech = samples.iter().any(|&s| s != 0);
                let job = match turns.process_chunk(is_speech, &samples) {
                    Some(TurnEvent::SpeechStarted) => Job::Started,
                    Some(TurnEvent::TurnCommitted(utterance)) => Job::Transcribe(utterance),
                    None => continue,
                };
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        handler.on_close();
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.session_id, "Closing transcription session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::PlaceholderStt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TranscriptEvent>>,
        opened: AtomicBool,
        closed: AtomicBool,
    }

    impl TranscriptHandler for Recorder {
        fn on_open(&self, _session_id: &str) {
            self.opened.store(true, Ordering::SeqCst);
        }

        fn on_transcript(&self, event: TranscriptEvent) {
            self.events.lock().push(event);
        }

        fn on_close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn chunk(value: i16) -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes())
            .take(800)
            .flatten()
            .collect()
    }

    fn transcriber(reply: &str) -> TurnTranscriber {
        TurnTranscriber::new(
            Arc::new(PlaceholderStt::with_response(reply)),
            TurnConfig::default(),
        )
    }

    #[test]
    fn stream_before_connect_fails() {
        let session = transcriber("ahoy");
        let recorder = Recorder::default();
        let mut source = std::iter::empty();
        assert!(matches!(
            session.stream(&mut source, &recorder),
            Err(VoiceError::Transcription(_))
        ));
    }

    #[test]
    fn utterance_produces_partial_then_final() {
        let session = transcriber("where be the treasure");
        session.connect().unwrap();
        let recorder = Recorder::default();

        let mut chunks: Vec<Vec<u8>> = (0..8).map(|_| chunk(2000)).collect();
        chunks.extend((0..20).map(|_| chunk(0)));
        let mut source = chunks.into_iter();

        session.stream(&mut source, &recorder).unwrap();

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                TranscriptEvent::partial(""),
                TranscriptEvent::final_text("where be the treasure"),
            ]
        );
        assert!(recorder.opened.load(Ordering::SeqCst));
        assert!(recorder.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn silence_produces_no_events() {
        let session = transcriber("unused");
        session.connect().unwrap();
        let recorder = Recorder::default();
        let mut source = (0..40).map(|_| chunk(0));
        session.stream(&mut source, &recorder).unwrap();
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn close_stops_stream_and_is_idempotent() {
        let session = transcriber("unused");
        session.connect().unwrap();
        session.close();
        session.close();
        let recorder = Recorder::default();
        let mut source = std::iter::repeat_with(|| chunk(2000));
        session.stream(&mut source, &recorder).unwrap();
        assert!(recorder.events.lock().is_empty());
        assert!(session.connect().is_err());
    }

    #[test]
    fn event_text_detection() {
        assert!(!TranscriptEvent::partial("  ").has_text());
        assert!(TranscriptEvent::final_text("arr").has_text());
    }
}
