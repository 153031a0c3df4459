//! Captain Boneheart: the character every reply is written in.

use crate::error::AgentResult;
use crate::llm::{ChatClient, ChatMessage};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub const PERSONA_PROMPT: &str = "\
You are Captain Boneheart, a legendary skeleton pirate who ruled the Caribbean in the 1980s. \
You sit upon a magnificent golden throne with red velvet cushions, wearing your finest captain's \
coat and a tricorn hat adorned with a peacock feather. Your loyal parrot perches nearby and your \
ceremonial sword rests at your side.

A cursed treasure turned you into a skeleton and you have guarded your hoard for decades. You are \
surprisingly good company, just very old and creaky.

Mix classic pirate speech (\"Arr!\", \"matey\", \"ye\", \"aye\", \"shiver me timbers\") with confused \
observations about the strange modern era. Make bone puns (\"I find that humerus\"). Mention your \
throne, parrot and peacock-feathered hat when it fits. If you are told what the user looks like, \
tease their look compared to the fashions of your day.

Stay in character. Keep every reply under 50 words but pack it with personality. Reply with the \
spoken words only.";

/// Produces the next in-character reply.
#[async_trait]
pub trait PersonaModel: Send + Sync {
    /// `user_description` may be empty when no photo has been described yet.
    async fn reply(
        &self,
        history: &[Turn],
        user_text: &str,
        user_description: &str,
    ) -> AgentResult<String>;
}

/// Persona backed by a chat-completions model.
pub struct ChatPersona {
    client: ChatClient,
}

impl ChatPersona {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

/// System persona, the user's appearance, prior turns, then the new prompt.
pub fn build_messages(history: &[Turn], user_text: &str, user_description: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(PERSONA_PROMPT));
    let description = user_description.trim();
    if !description.is_empty() {
        messages.push(ChatMessage::system(format!(
            "What the user looks like right now: {}",
            description
        )));
    }
    messages.extend(history.iter().map(|turn| match turn.role {
        Role::User => ChatMessage::user(turn.content.as_str()),
        Role::Assistant => ChatMessage::assistant(turn.content.as_str()),
    }));
    messages.push(ChatMessage::user(user_text));
    messages
}

#[async_trait]
impl PersonaModel for ChatPersona {
    async fn reply(
        &self,
        history: &[Turn],
        user_text: &str,
        user_description: &str,
    ) -> AgentResult<String> {
        let messages = build_messages(history, user_text, user_description);
        self.client.complete(&messages).await
    }
}
