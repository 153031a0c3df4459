//! Agent configuration loaded from `config/boneheart.toml` and `BONEHEART_*` env.
//!
//! Secrets (API keys, webhook URLs) never live in the config file; see [`Secrets`].

use crate::error::{AgentError, AgentResult};
use boneheart_voice::{AudioConfig, IdleConfig, TurnConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Photo refresh intervals below this are raised to it.
pub const MIN_PHOTO_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_LLM_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_CAPTURE_COMMAND: &str = "fswebcam -q --no-banner -r 1280x720 --jpeg 85 -";

/// Runtime settings.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | voice_id | Myn1LuZgd2qPMOg9BNtC | ElevenLabs voice for replies |
/// | image_prompt | Describe the person/people in this image | Vision prompt |
/// | sample_rate | 16000 | Microphone rate (Hz) |
/// | amplitude_threshold | 500 | Peak below which chunks become silence |
/// | idle_audio_dir | idle_audio | Clips for idle mode |
/// | idle_min_interval_secs / idle_max_interval_secs | 10 / 60 | Gap between idle clips |
/// | photo_interval_secs | 30 | Photo refresh period (floor 10) |
/// | vision_timeout_secs | 10 | Wait for one vision result |
/// | end_utterance_silence_ms | 700 | Silence that ends an utterance |
/// | llm_api_url / llm_model | Gemini OpenAI-compatible / gemini-2.5-flash-lite | Persona and vision model |
/// | capture_command | fswebcam ... - | Command printing one JPEG to stdout |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub voice_id: String,
    pub image_prompt: String,
    pub sample_rate: u32,
    pub amplitude_threshold: u16,
    pub idle_audio_dir: PathBuf,
    pub idle_min_interval_secs: u64,
    pub idle_max_interval_secs: u64,
    pub photo_interval_secs: u64,
    pub vision_timeout_secs: u64,
    pub end_utterance_silence_ms: u64,
    pub llm_api_url: String,
    pub llm_model: String,
    pub capture_command: String,
}

impl AgentConfig {
    /// Load config. Precedence: `BONEHEART_*` env > file at `BONEHEART_CONFIG` (default `config/boneheart`) > defaults.
    pub fn load() -> AgentResult<Self> {
        let config_path =
            std::env::var("BONEHEART_CONFIG").unwrap_or_else(|_| "config/boneheart".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load with an explicit file path (with or without extension). A missing file is not an error.
    pub fn load_from(path: &Path) -> AgentResult<Self> {
        let builder = config::Config::builder()
            .set_default("voice_id", boneheart_voice::DEFAULT_VOICE_ID)?
            .set_default("image_prompt", "Describe the person/people in this image")?
            .set_default("sample_rate", 16000_i64)?
            .set_default("amplitude_threshold", 500_i64)?
            .set_default("idle_audio_dir", "idle_audio")?
            .set_default("idle_min_interval_secs", 10_i64)?
            .set_default("idle_max_interval_secs", 60_i64)?
            .set_default("photo_interval_secs", 30_i64)?
            .set_default("vision_timeout_secs", 10_i64)?
            .set_default("end_utterance_silence_ms", 700_i64)?
            .set_default("llm_api_url", DEFAULT_LLM_API_URL)?
            .set_default("llm_model", DEFAULT_LLM_MODEL)?
            .set_default("capture_command", DEFAULT_CAPTURE_COMMAND)?;

        let built = builder
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("BONEHEART")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Effective photo interval, never below [`MIN_PHOTO_INTERVAL_SECS`].
    pub fn photo_interval(&self) -> Duration {
        Duration::from_secs(self.photo_interval_secs.max(MIN_PHOTO_INTERVAL_SECS))
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }

    pub fn audio(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            threshold: self.amplitude_threshold,
            ..AudioConfig::default()
        }
    }

    pub fn turns(&self) -> TurnConfig {
        TurnConfig {
            silence_threshold: Duration::from_millis(self.end_utterance_silence_ms),
            sample_rate: self.sample_rate,
            ..TurnConfig::default()
        }
    }

    pub fn idle(&self) -> IdleConfig {
        IdleConfig {
            audio_dir: self.idle_audio_dir.clone(),
            min_interval: Duration::from_secs(self.idle_min_interval_secs),
            max_interval: Duration::from_secs(self.idle_max_interval_secs),
        }
    }

    /// `capture_command` split into program and arguments.
    pub fn capture_argv(&self) -> AgentResult<Vec<String>> {
        let argv: Vec<String> = self
            .capture_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if argv.is_empty() {
            return Err(AgentError::Vision("capture_command is empty".to_string()));
        }
        Ok(argv)
    }
}

/// Secrets read from the environment only.
///
/// | Env | Used for |
/// |-----|----------|
/// | GEMINI_API_KEY (or LLM_API_KEY) | Persona replies and vision (required) |
/// | ELEVENLABS_API_KEY | Speech; placeholder (silent) without it |
/// | STT_API_KEY / STT_API_URL / STT_MODEL | Transcription; placeholder without it |
/// | LOGS_WEBHOOK_URL / ALERTS_WEBHOOK_URL | Optional log and alert webhooks |
#[derive(Clone, Default)]
pub struct Secrets {
    pub llm_api_key: Option<String>,
    pub logs_webhook_url: Option<String>,
    pub alerts_webhook_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            llm_api_key: env_opt_string("GEMINI_API_KEY").or_else(|| env_opt_string("LLM_API_KEY")),
            logs_webhook_url: env_opt_string("LOGS_WEBHOOK_URL"),
            alerts_webhook_url: env_opt_string("ALERTS_WEBHOOK_URL"),
        }
    }

    /// The LLM key; its absence is fatal at startup.
    pub fn require_llm_key(&self) -> AgentResult<&str> {
        self.llm_api_key
            .as_deref()
            .ok_or(AgentError::MissingSecret("GEMINI_API_KEY"))
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("logs_webhook_url", &self.logs_webhook_url.is_some())
            .field("alerts_webhook_url", &self.alerts_webhook_url.is_some())
            .finish()
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("missing")).unwrap();
        assert_eq!(config.voice_id, "Myn1LuZgd2qPMOg9BNtC");
        assert_eq!(config.image_prompt, "Describe the person/people in this image");
        assert_eq!(config.idle_audio_dir, PathBuf::from("idle_audio"));
        assert_eq!(config.photo_interval(), Duration::from_secs(30));
        assert_eq!(config.audio().chunk_samples(), config.sample_rate as usize / 20);
    }

    #[test]
    fn file_overrides_and_photo_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boneheart.toml");
        std::fs::write(
            &path,
            "photo_interval_secs = 5\nidle_min_interval_secs = 3\nidle_max_interval_secs = 4\nend_utterance_silence_ms = 900\n",
        )
        .unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.photo_interval(), Duration::from_secs(MIN_PHOTO_INTERVAL_SECS));
        assert_eq!(config.idle().min_interval, Duration::from_secs(3));
        assert_eq!(config.turns().silence_threshold, Duration::from_millis(900));
    }

    #[test]
    fn capture_command_is_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::load_from(&dir.path().join("missing")).unwrap();
        config.capture_command = "  cam --jpeg  - ".to_string();
        assert_eq!(config.capture_argv().unwrap(), vec!["cam", "--jpeg", "-"]);
        config.capture_command = "   ".to_string();
        assert!(config.capture_argv().is_err());
    }

    #[test]
    fn missing_llm_key_is_reported() {
        let secrets = Secrets::default();
        assert!(matches!(
            secrets.require_llm_key(),
            Err(AgentError::MissingSecret("GEMINI_API_KEY"))
        ));
        let debug = format!("{:?}", Secrets { llm_api_key: Some("sk".into()), ..Default::default() });
        assert!(debug.contains("***"));
    }
}
