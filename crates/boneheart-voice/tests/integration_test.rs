//! Integration tests for the capture → gate → transcription path.
//!
//! Hardware tests are ignored by default; the rest drive the pipeline with a scripted device.

use boneheart_voice::{
    AudioConfig, CaptureDevice, MutableMicStream, PlaceholderStt, TranscriptEvent,
    TranscriptHandler, TranscriptionSession, TurnConfig, TurnTranscriber, VoiceResult,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Plays back a fixed amplitude pattern, one value per chunk, then ends with silence.
struct PatternDevice {
    pattern: Vec<i16>,
    position: usize,
}

impl CaptureDevice for PatternDevice {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> VoiceResult<usize> {
        let value = self.pattern.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        buf.fill(value);
        Ok(buf.len())
    }

    fn close(&mut self) {}
}

struct Collect {
    mic: MutableMicStream,
    events: Mutex<Vec<TranscriptEvent>>,
    stop_after_finals: usize,
}

impl TranscriptHandler for Collect {
    fn on_transcript(&self, event: TranscriptEvent) {
        let mut events = self.events.lock();
        events.push(event);
        if events.iter().filter(|e| e.is_final).count() >= self.stop_after_finals {
            self.mic.close();
        }
    }
}

fn mic_with(pattern: Vec<i16>) -> MutableMicStream {
    let config = AudioConfig::default();
    MutableMicStream::with_device(Box::new(PatternDevice { pattern, position: 0 }), &config)
}

#[test]
fn loud_speech_becomes_a_final_transcript() {
    let mut pattern = vec![3000i16; 10];
    pattern.extend(vec![0i16; 20]);
    let mut mic = mic_with(pattern);

    let session = TurnTranscriber::new(
        Arc::new(PlaceholderStt::with_response("shiver me timbers")),
        TurnConfig::default(),
    );
    session.connect().unwrap();
    let handler = Collect {
        mic: mic.clone(),
        events: Mutex::new(Vec::new()),
        stop_after_finals: 1,
    };
    session.stream(&mut mic, &handler).unwrap();

    let events = handler.events.lock();
    assert_eq!(events.last(), Some(&TranscriptEvent::final_text("shiver me timbers")));
    assert!(!mic.is_open());
}

#[test]
fn quiet_input_below_threshold_never_triggers_speech() {
    let mic = mic_with(vec![400i16; 40]);
    let control = mic.clone();

    let session = TurnTranscriber::new(Arc::new(PlaceholderStt::new()), TurnConfig::default());
    session.connect().unwrap();
    let handler = Collect {
        mic: mic.clone(),
        events: Mutex::new(Vec::new()),
        stop_after_finals: 1,
    };

    let mut limited = std::iter::from_fn(|| mic.next_chunk()).take(60);
    session.stream(&mut limited, &handler).unwrap();
    assert!(handler.events.lock().is_empty());
    control.close();
}

#[test]
fn muted_mic_suppresses_speech() {
    let mut mic = mic_with(vec![8000i16; 40]);
    mic.mute();

    let session = TurnTranscriber::new(Arc::new(PlaceholderStt::new()), TurnConfig::default());
    session.connect().unwrap();
    let handler = Collect {
        mic: mic.clone(),
        events: Mutex::new(Vec::new()),
        stop_after_finals: 1,
    };
    let mut limited = mic.by_ref().take(60);
    session.stream(&mut limited, &handler).unwrap();
    assert!(handler.events.lock().is_empty());
}

#[test]
#[ignore] // Requires audio hardware
fn test_default_microphone_opens_and_closes() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mic = MutableMicStream::open(&AudioConfig::default()).expect("Failed to open microphone");
    let chunk = mic.next_chunk().expect("stream ended early");
    assert_eq!(chunk.len(), mic.chunk_bytes());
    mic.close();
    mic.close();
    assert!(mic.next_chunk().is_none());
}
