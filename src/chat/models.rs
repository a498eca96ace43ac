//! The core models for persisted conversations.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{GenerationDefaults, clamp_max_tokens};
use crate::openai;

/// Title of a chat until one gets generated
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

pub use crate::openai::Role;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
        }
    }
}

// The id is local to the chat and never sent upstream
impl From<&Message> for openai::Message {
    fn from(msg: &Message) -> Self {
        openai::Message::new(msg.role, &msg.content)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

impl Chat {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            date_time: Utc::now(),
            model: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            channel: None,
            user_prompt: None,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CHAT_TITLE
    }

    /// Resolve the generation settings for this chat. Fields that
    /// aren't set on the chat track the current defaults.
    pub fn settings(&self, defaults: &GenerationDefaults) -> ChatSettings {
        let model = self.model.clone().unwrap_or_else(|| defaults.model.clone());
        let max_tokens = clamp_max_tokens(&model, self.max_tokens.unwrap_or(defaults.max_tokens));
        ChatSettings {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            channel: self
                .channel
                .clone()
                .unwrap_or_else(|| defaults.channel.clone()),
            user_prompt: self.user_prompt.clone(),
            max_tokens,
            model,
        }
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// Effective generation settings for a chat
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub channel: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub user_prompt: Option<String>,
}

/// A single mutable field of a chat. `None` clears a setting so it
/// falls back to the defaults again.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatField {
    Title(String),
    Model(Option<String>),
    Temperature(Option<f32>),
    TopP(Option<f32>),
    MaxTokens(Option<u32>),
    Channel(Option<String>),
    UserPrompt(Option<String>),
}

impl ChatField {
    pub(crate) fn apply(self, chat: &mut Chat) {
        match self {
            ChatField::Title(title) => chat.title = title,
            ChatField::Model(model) => chat.model = model,
            ChatField::Temperature(temperature) => chat.temperature = temperature,
            ChatField::TopP(top_p) => chat.top_p = top_p,
            ChatField::MaxTokens(max_tokens) => chat.max_tokens = max_tokens,
            ChatField::Channel(channel) => chat.channel = channel,
            ChatField::UserPrompt(user_prompt) => chat.user_prompt = user_prompt,
        }
    }
}

/// Per-chat error flag shown next to the last message with a retry
/// affordance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorState {
    pub has_error: bool,
    pub chat_id: String,
}
