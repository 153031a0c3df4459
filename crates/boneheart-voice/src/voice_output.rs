//! **Speech synthesis**: turn a reply into playable audio bytes.
//!
//! The agent calls [`SpeechSynthesizer::synthesize`] once per reply and hands the bytes to a
//! [`crate::playback::SpeechPlayer`]. `None` means "carry on without audio".

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default ElevenLabs voice for the Boneheart character.
pub const DEFAULT_VOICE_ID: &str = "Myn1LuZgd2qPMOg9BNtC";

/// Backend that turns text into audio bytes (MP3/WAV).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`. `Ok(None)` means there is nothing to play.
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<Vec<u8>>>;
}

/// Placeholder TTS: never produces audio. Used when no TTS key is configured.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl SpeechSynthesizer for PlaceholderTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Production TTS backend: ElevenLabs streaming endpoint.
/// Uses `ELEVENLABS_API_KEY` and optionally `ELEVENLABS_API_URL` (default https://api.elevenlabs.io/v1).
#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    /// Base URL without trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    /// e.g. eleven_flash_v2_5
    pub model: String,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    /// Build from environment: ELEVENLABS_API_KEY, ELEVENLABS_API_URL, ELEVENLABS_MODEL.
    pub fn from_env(voice_id: impl Into<String>) -> VoiceResult<Self> {
        let base_url = std::env::var("ELEVENLABS_API_URL")
            .unwrap_or_else(|_| "https://api.elevenlabs.io/v1".to_string());
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map_err(|_| VoiceError::Config("TTS requires ELEVENLABS_API_KEY".to_string()))?;
        let model =
            std::env::var("ELEVENLABS_MODEL").unwrap_or_else(|_| "eleven_flash_v2_5".to_string());
        Self::new(base_url, api_key, voice_id, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        voice_id: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            model: model.into(),
            client,
        })
    }

    fn speech_url(&self) -> String {
        format!(
            "{}/text-to-speech/{}/stream",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        )
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.model,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "style": 0.0,
                "use_speaker_boost": true,
                "speed": 1.0,
            },
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<Vec<u8>>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let res = self
            .client
            .post(self.speech_url())
            .query(&[
                ("output_format", "mp3_22050_32"),
                ("optimize_streaming_latency", "3"),
            ])
            .header("xi-api-key", &self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        debug!(bytes = bytes.len(), "TTS audio received");
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_tts_returns_nothing() {
        let tts = PlaceholderTts;
        assert!(tts.synthesize("hello").await.unwrap().is_none());
    }

    #[test]
    fn speech_url_targets_streaming_endpoint() {
        let tts = ElevenLabsTts::new("https://api.example.com/v1/", "k", "voice123", "m").unwrap();
        assert_eq!(tts.speech_url(), "https://api.example.com/v1/text-to-speech/voice123/stream");
        let body = tts.request_body("Arr");
        assert_eq!(body["text"], "Arr");
        assert_eq!(body["voice_settings"]["similarity_boost"], 0.75);
    }

    #[tokio::test]
    async fn blank_text_skips_request() {
        let tts = ElevenLabsTts::new("http://127.0.0.1:9", "k", "v", "m").unwrap();
        assert!(tts.synthesize("   ").await.unwrap().is_none());
    }
}
