//! OpenAI-compatible chat-completions client (Gemini, OpenRouter, OpenAI).
//!
//! Used for persona replies and for describing camera frames.

use crate::error::{AgentError, AgentResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// One message in a chat request. `content` is a string or a multi-part array.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(text.into()),
        }
    }

    /// A user message carrying `prompt` and a JPEG as a base64 data URL.
    pub fn user_with_image(prompt: &str, jpeg: &[u8]) -> Self {
        let url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        Self {
            role: "user".to_string(),
            content: json!([
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": url } },
            ]),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Chat-completions client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send `messages` and return the first choice's text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> AgentResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: None,
        };
        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("LLM API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AgentError::Llm("empty completion".to_string()))
    }
}
