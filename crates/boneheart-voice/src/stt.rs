//! **Speech-to-Text (STT)**: convert a finished [`Utterance`] into text.
//!
//! Implement `SttBackend` for local Whisper (e.g. whisper-rs) or a remote transcription API.
//! The local transcription session calls it once per committed utterance.

use crate::error::{VoiceError, VoiceResult};
use crate::turn::Utterance;
use std::io::Cursor;

/// Backend for converting PCM to text. Implement for local Whisper or remote STT.
pub trait SttBackend: Send + Sync {
    /// Transcribe one utterance. Return an empty string if nothing was recognised.
    fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String>;
}

/// Encode 16-bit mono PCM to WAV bytes for API upload.
pub fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Stt(format!("WAV header: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceError::Stt(format!("WAV write: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Stt(format!("WAV finalize: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Placeholder STT: returns a fixed string. Use for running the agent without Whisper/API.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, return this instead of the default message.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl SttBackend for PlaceholderStt {
    fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if let Some(ref r) = self.response {
            return Ok(r.clone());
        }
        Ok(format!(
            "[STT placeholder: {} samples, {:.1}s; set STT_API_KEY or WHISPER_MODEL_PATH]",
            utterance.samples.len(),
            utterance.duration.as_secs_f32()
        ))
    }
}

/// Production STT backend: OpenAI-compatible transcription API (OpenAI Whisper, Groq, etc.).
/// Uses `STT_API_URL` (e.g. https://api.openai.com/v1), `STT_API_KEY`, and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct HttpStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1 or gpt-4o-transcribe, etc.
    pub model: String,
    client: reqwest::blocking::Client,
}

impl HttpStt {
    /// Build from environment: STT_API_URL, STT_API_KEY, STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn transcriptions_url(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }
}

impl SttBackend for HttpStt {
    fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if utterance.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(&utterance.samples, utterance.sample_rate)?;
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(self.transcriptions_url())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml; see README.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper STT: loads a ggml model (e.g. ggml-base.en.bin) and runs inference on-device.
    /// Audio must be 16 kHz mono.
    pub struct WhisperStt {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
    }

    impl WhisperStt {
        /// Load the Whisper model from `model_path`.
        pub fn new(model_path: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
            })
        }
    }

    impl SttBackend for WhisperStt {
        fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
            if utterance.samples.is_empty() {
                return Ok(String::new());
            }
            if utterance.sample_rate != 16000 {
                return Err(VoiceError::Stt(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    utterance.sample_rate
                )));
            }
            let pcm: Vec<f32> = utterance
                .samples
                .iter()
                .map(|&s| s as f32 / 32768.0)
                .collect();

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some("en"));

            let mut state = self
                .state
                .lock()
                .map_err(|e| VoiceError::Stt(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(&params, &pcm)
                .map_err(|e| VoiceError::Stt(format!("Whisper inference failed: {}", e)))?;
            let text = state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
            Ok(text)
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Create the best available STT backend from environment.
/// Priority: (1) WhisperStt if `WHISPER_MODEL_PATH` is set and the model loads (requires `whisper` feature),
/// (2) HttpStt if `STT_API_KEY` is set, (3) PlaceholderStt.
pub fn create_best_stt() -> Box<dyn SttBackend> {
    #[cfg(feature = "whisper")]
    {
        if let Ok(path) = std::env::var("WHISPER_MODEL_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                match whisper_stt::WhisperStt::new(path) {
                    Ok(w) => return Box::new(w),
                    Err(e) => tracing::warn!("Whisper unavailable, falling back: {}", e),
                }
            }
        }
    }
    if let Ok(http) = HttpStt::from_env() {
        return Box::new(http);
    }
    tracing::warn!("No STT backend configured (STT_API_KEY); using placeholder transcripts");
    Box::new(PlaceholderStt::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn utterance(samples: Vec<i16>) -> Utterance {
        Utterance {
            duration: Duration::from_millis(samples.len() as u64 / 16),
            samples,
            timestamp: Utc::now(),
            sample_rate: 16000,
        }
    }

    #[test]
    fn placeholder_returns_message() {
        let stt = PlaceholderStt::new();
        let s = stt.transcribe(&utterance(vec![0; 480])).unwrap();
        assert!(s.contains("STT placeholder"));
        assert!(s.contains("480"));
    }

    #[test]
    fn placeholder_with_response() {
        let stt = PlaceholderStt::with_response("hello world");
        assert_eq!(stt.transcribe(&utterance(vec![])).unwrap(), "hello world");
    }

    #[test]
    fn wav_has_riff_header_and_pcm_payload() {
        let wav = pcm_to_wav(&[1, -1, 300], 16000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[44..], &[1, 0, 0xff, 0xff, 0x2c, 0x01]);
    }

    #[test]
    fn transcription_url_trims_trailing_slash() {
        let stt = HttpStt::new("https://api.example.com/v1/", "key", "whisper-1").unwrap();
        assert_eq!(stt.transcriptions_url(), "https://api.example.com/v1/audio/transcriptions");
    }
}
