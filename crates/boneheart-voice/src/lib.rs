//! # Boneheart Voice
//!
//! The audio side of the Boneheart animatronic: a mutable microphone source, a local
//! transcription session, speech synthesis, playback and the idle-clip scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────┐     │
//! │  │ Mic (cpal)   │ → │ Amplitude gate│ → │ Turn manager │     │
//! │  │ mute / close │   │ (silence sub) │   │ (700ms gap)  │     │
//! │  └──────────────┘   └───────────────┘   └──────────────┘     │
//! │                                                ↓             │
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────┐     │
//! │  │ AudioOutput  │ ← │ SpeechSynth   │   │  STT backend │ → events
//! │  │   (rodio)    │ ← │ Idle player   │   └──────────────┘     │
//! │  └──────────────┘   └───────────────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod error;
pub mod idle;
pub mod playback;
pub mod stt;
pub mod transcriber;
pub mod turn;
pub mod voice_output;

pub use audio::{AudioConfig, CaptureDevice, CpalCapture, MutableMicStream, CHUNK_DURATION_MS};
pub use error::{VoiceError, VoiceResult};
pub use idle::{IdleConfig, IdleLibrary, IdlePlayer, IDLE_AUDIO_EXTENSIONS};
pub use playback::{AudioOutput, ClipPlayer, SpeechPlayer};
pub use stt::{create_best_stt, pcm_to_wav, HttpStt, PlaceholderStt, SttBackend};
#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
pub use transcriber::{TranscriptEvent, TranscriptHandler, TranscriptionSession, TurnTranscriber};
pub use turn::{TurnConfig, TurnEvent, TurnManager, Utterance};
pub use voice_output::{ElevenLabsTts, PlaceholderTts, SpeechSynthesizer, DEFAULT_VOICE_ID};
