//! Conversations: the persisted chat registry, the controller that
//! drives a streamed exchange and the collaborators it talks to.

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::openai::Message;
use crate::prompt::{channel_prompt, current_date, resolve_date};

pub mod models;
pub use models::{Chat, ChatField, ChatSettings, ErrorState, Role};

pub mod registry;
pub use registry::ChatRegistry;

pub mod controller;
pub use controller::{ControllerError, ConversationController, Exchange, Finished};

pub mod stream;
pub use stream::{ExchangeResult, Outcome, SharedController, run_exchange};

/// Body of a completion request. Also the wire format of the
/// `/api/chat` route.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
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
}

impl CompletionRequest {
    /// The system prompt for this request: the override when there is
    /// a non-empty one, otherwise the channel's default prompt.
    pub fn system_prompt(&self) -> String {
        match &self.user_prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt.clone(),
            _ => resolve_date(
                channel_prompt(self.channel.as_deref().unwrap_or("default")),
                &current_date(),
            ),
        }
    }
}

/// Produces the text of an assistant reply incrementally.
#[async_trait]
pub trait CompletionStream: Send + Sync {
    /// Send each chunk of the reply to `tx` and return once the reply
    /// is complete. Dropping the returned future cancels the request.
    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<(), Error>;
}

/// Produces a short title for a conversation.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate_title(&self, messages: &[Message]) -> Result<String, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::DATE_PLACEHOLDER;

    #[test]
    fn test_system_prompt_prefers_override() {
        let request = CompletionRequest {
            user_prompt: Some(String::from("Talk like a pirate")),
            ..Default::default()
        };
        assert_eq!(request.system_prompt(), "Talk like a pirate");
    }

    #[test]
    fn test_system_prompt_falls_back_to_channel() {
        let request = CompletionRequest {
            user_prompt: Some(String::from("  ")),
            channel: Some(String::from("default")),
            ..Default::default()
        };
        let prompt = request.system_prompt();
        assert!(prompt.starts_with("You are ChatGPT"));
        assert!(!prompt.contains(DATE_PLACEHOLDER));
    }

    #[test]
    fn test_completion_request_wire_format() {
        let json = r#"{
            "messages": [{"role": "user", "content": "Hello"}],
            "userPrompt": "Be brief",
            "model": "gpt-4o-2024-08-06",
            "temperature": 0.5,
            "topP": 0.9,
            "maxTokens": 16384
        }"#;
        let request: CompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.max_tokens, Some(16_384));
        assert_eq!(request.channel, None);

        let minimal: CompletionRequest = serde_json::from_str(r#"{"messages": []}"#).unwrap();
        assert_eq!(minimal, CompletionRequest::default());
    }
}
