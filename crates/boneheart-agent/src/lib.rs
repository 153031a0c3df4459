//! # Captain Boneheart
//!
//! Interactive pirate animatronic. Listens on the microphone, answers in character through
//! an LLM persona and speech synthesis, keeps a short description of whoever is in front of
//! the camera, and plays ambient clips when put into idle mode.
//!
//! The audio side lives in `boneheart-voice`; this crate owns configuration, the persona,
//! vision, the session state machine and the keyboard commands.

pub mod alerts;
pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod persona;
pub mod responder;
pub mod session;
pub mod state;
pub mod vision;

pub use alerts::{init_tracing, LogOutput, WebhookAlertLayer};
pub use commands::{run_command_loop, spawn_stdin_reader, Command, HELP_TEXT};
pub use config::{AgentConfig, Secrets};
pub use error::{AgentError, AgentResult};
pub use llm::{ChatClient, ChatMessage};
pub use persona::{ChatPersona, PersonaModel, Turn, PERSONA_PROMPT};
pub use responder::{ResponseWorker, SpeechResponder, FALLBACK_REPLY};
pub use session::{build_session, SessionController, SessionParts};
pub use state::{Mode, SessionState};
pub use vision::{
    CameraVision, PhotoRefresher, ProcessVision, UserDescription, VisionAnalyzer,
    MIN_PHOTO_INTERVAL,
};

/// Take one photo and describe it. Runs inside the `describe` worker process.
pub async fn describe_once(config: &AgentConfig, secrets: &Secrets) -> AgentResult<String> {
    let client = ChatClient::new(
        config.llm_api_url.as_str(),
        secrets.require_llm_key()?,
        config.llm_model.as_str(),
    )?;
    let vision = CameraVision::new(client, config.image_prompt.as_str(), config.capture_argv()?);
    vision.capture_and_describe().await
}
