//! Utterance segmentation for the local transcription session.
//!
//! Implements the "gap logic": an utterance ends once the gated microphone has produced
//! silence for `silence_threshold` after speech. Time is measured in audio time (samples
//! consumed), so segmentation is independent of how fast chunks are pulled.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A finished utterance ready for speech-to-text.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Mono 16-bit PCM for the whole utterance (trailing silence excluded).
    pub samples: Vec<i16>,
    /// When the utterance was committed.
    pub timestamp: DateTime<Utc>,
    /// Speech duration.
    pub duration: Duration,
    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,
}

/// Events emitted by the turn manager
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// User started speaking
    SpeechStarted,

    /// Utterance is committed (ready for transcription)
    TurnCommitted(Utterance),
}

/// Configuration for turn detection
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Silence duration before committing a turn (default: 700ms)
    pub silence_threshold: Duration,

    /// Minimum speech duration to be considered a valid turn (default: 200ms)
    pub min_speech_duration: Duration,

    /// Maximum turn duration before auto-commit (default: 30s)
    pub max_turn_duration: Duration,

    /// Sample rate for audio (default: 16000 Hz)
    pub sample_rate: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(700),
            min_speech_duration: Duration::from_millis(200),
            max_turn_duration: Duration::from_secs(30),
            sample_rate: 16000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TurnState {
    Idle,
    Speaking,
    SilenceDetected,
}

/// Tracks speech/silence across chunks and commits utterances on the gap.
pub struct TurnManager {
    config: TurnConfig,
    state: TurnState,
    // Audio time, in samples, spent speaking and in the current silence run.
    speech_samples: usize,
    silence_samples: usize,
    audio_buffer: Vec<i16>,
}

impl TurnManager {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            state: TurnState::Idle,
            speech_samples: 0,
            silence_samples: 0,
            audio_buffer: Vec::new(),
        }
    }

    /// Feed one chunk. At most one event is produced per chunk.
    pub fn process_chunk(&mut self, is_speech: bool, chunk: &[i16]) -> Option<TurnEvent> {
        match (self.state, is_speech) {
            (TurnState::Idle, true) => {
                debug!("🎤 Speech started");
                self.state = TurnState::Speaking;
                self.audio_buffer.clear();
                self.audio_buffer.extend_from_slice(chunk);
                self.speech_samples = chunk.len();
                self.silence_samples = 0;
                Some(TurnEvent::SpeechStarted)
            }

            (TurnState::Speaking, true) | (TurnState::SilenceDetected, true) => {
                self.state = TurnState::Speaking;
                self.silence_samples = 0;
                self.audio_buffer.extend_from_slice(chunk);
                self.speech_samples += chunk.len();
                if self.samples_to_duration(self.speech_samples) >= self.config.max_turn_duration {
                    warn!("⏱️ Max turn duration reached, auto-committing");
                    return self.commit_turn();
                }
                None
            }

            (TurnState::Speaking, false) | (TurnState::SilenceDetected, false) => {
                self.state = TurnState::SilenceDetected;
                self.silence_samples += chunk.len();
                if self.samples_to_duration(self.silence_samples) >= self.config.silence_threshold {
                    return self.commit_turn();
                }
                None
            }

            (TurnState::Idle, false) => None,
        }
    }

    fn commit_turn(&mut self) -> Option<TurnEvent> {
        let duration = self.samples_to_duration(self.speech_samples);
        if duration < self.config.min_speech_duration {
            debug!("⏭️ Speech too short ({:?}), ignoring", duration);
            self.reset();
            return None;
        }

        info!("🎯 Utterance committed: {:?}, {} samples", duration, self.audio_buffer.len());
        let utterance = Utterance {
            samples: std::mem::take(&mut self.audio_buffer),
            timestamp: Utc::now(),
            duration,
            sample_rate: self.config.sample_rate,
        };
        self.reset();
        Some(TurnEvent::TurnCommitted(utterance))
    }

    fn samples_to_duration(&self, samples: usize) -> Duration {
        let micros = samples as u64 * 1_000_000 / self.config.sample_rate.max(1) as u64;
        Duration::from_micros(micros)
    }

    /// Reset the turn manager state
    pub fn reset(&mut self) {
        self.state = TurnState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;
        self.audio_buffer.clear();
    }

    /// Get the current state (for testing/debugging)
    pub fn state(&self) -> &str {
        match self.state {
            TurnState::Idle => "idle",
            TurnState::Speaking => "speaking",
            TurnState::SilenceDetected => "silence_detected",
        }
    }
}
