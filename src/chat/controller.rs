//! Binds the chat and prompt registries to a streamed exchange.
//!
//! Each chat moves through `idle -> streaming -> committed | errored`.
//! While streaming, the reply accumulates in an in-memory buffer and
//! nothing is written to the registry until the stream ends. The
//! controller only reacts to events; `stream::run_exchange` feeds it
//! from a live completion stream.

use std::collections::{HashMap, HashSet};

use anyhow::Error;
use tokio_util::sync::CancellationToken;

use super::models::{Chat, ChatField, ErrorState, Message, Role};
use super::CompletionRequest;
use super::registry::ChatRegistry;
use crate::core::GenerationDefaults;
use crate::core::config::is_reasoning_model;
use crate::openai;
use crate::prompt::{PromptRegistry, current_date, resolve_date};
use crate::store::SharedStore;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("Stores are still loading")]
    NotHydrated,
    #[error("No chat is selected")]
    NoChatSelected,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Chat {0} is still receiving a response")]
    StreamInProgress(String),
    #[error("There is no message to retry")]
    NothingToRetry,
}

/// A started exchange, handed to the stream driver.
#[derive(Debug)]
pub struct Exchange {
    pub chat_id: String,
    pub request: CompletionRequest,
    pub stop: CancellationToken,
}

/// Result of committing a finished (or stopped) stream.
#[derive(Debug, PartialEq)]
pub struct Finished {
    pub chat_id: String,
    pub messages: Vec<Message>,
    /// Set when a title should be generated from these messages
    pub title_request: Option<Vec<openai::Message>>,
}

struct ActiveStream {
    messages: Vec<Message>,
    reply: String,
    stop: CancellationToken,
}

pub struct ConversationController {
    chats: ChatRegistry,
    prompts: PromptRegistry,
    defaults: GenerationDefaults,
    streams: HashMap<String, ActiveStream>,
    pending_titles: HashSet<String>,
    error: ErrorState,
}

impl ConversationController {
    pub fn new(store: SharedStore, defaults: GenerationDefaults) -> Self {
        Self {
            chats: ChatRegistry::new(store.clone()),
            prompts: PromptRegistry::new(store),
            defaults,
            streams: HashMap::new(),
            pending_titles: HashSet::new(),
            error: ErrorState::default(),
        }
    }

    /// Hydrate both registries, then return to the previously selected
    /// chat or start a new one.
    pub async fn start(&mut self) -> Vec<Message> {
        self.chats.hydrate().await;
        self.prompts.hydrate().await;
        let chat_id = self.ensure_selected();
        self.load_chat(&chat_id).unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.chats.is_hydrated() && self.prompts.is_hydrated()
    }

    pub fn chats(&self) -> &ChatRegistry {
        &self.chats
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn prompts_mut(&mut self) -> &mut PromptRegistry {
        &mut self.prompts
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    pub fn set_defaults(&mut self, defaults: GenerationDefaults) {
        self.defaults = defaults;
    }

    pub fn selected_chat(&self) -> Option<&Chat> {
        self.chats.selected()
    }

    /// Id of the selected chat, creating a chat when nothing is
    /// selected.
    pub fn ensure_selected(&mut self) -> String {
        if self.chats.selected().is_none() {
            return self.chats.create_chat().id;
        }
        self.chats.selected_chat_id().to_string()
    }

    pub fn new_chat(&mut self) -> Result<Chat, ControllerError> {
        self.check_ready()?;
        let chat = self.chats.create_chat();
        self.reset_error();
        Ok(chat)
    }

    /// Select a chat and return the messages to display. Streams on
    /// other chats keep running.
    pub fn load_chat(&mut self, chat_id: &str) -> Option<Vec<Message>> {
        let previous = self.chats.selected_chat_id().to_string();
        self.chats.select_chat(chat_id)?;
        if previous != chat_id {
            self.reset_error();
        }
        Some(self.visible_messages())
    }

    pub fn delete_chat(&mut self, chat_id: &str) {
        if let Some(active) = self.streams.remove(chat_id) {
            active.stop.cancel();
        }
        self.pending_titles.remove(chat_id);
        if self.error.chat_id == chat_id {
            self.reset_error();
        }
        self.chats.delete_chat(chat_id);
    }

    pub fn update_setting(&mut self, field: ChatField) -> Result<(), ControllerError> {
        let chat_id = self.selected_id()?;
        self.chats.update_field(&chat_id, field);
        Ok(())
    }

    /// Clear the per-chat overrides so the chat follows the defaults.
    pub fn reset_settings(&mut self) -> Result<(), ControllerError> {
        let chat_id = self.selected_id()?;
        for field in [
            ChatField::Model(None),
            ChatField::Channel(None),
            ChatField::Temperature(None),
            ChatField::TopP(None),
            ChatField::MaxTokens(None),
        ] {
            self.chats.update_field(&chat_id, field);
        }
        self.prompts.select_prompt(None);
        Ok(())
    }

    pub fn is_streaming(&self, chat_id: &str) -> bool {
        self.streams.contains_key(chat_id)
    }

    /// Messages of the selected chat including a reply that is still
    /// streaming.
    pub fn visible_messages(&self) -> Vec<Message> {
        let chat_id = self.chats.selected_chat_id();
        if let Some(active) = self.streams.get(chat_id) {
            let mut messages = active.messages.clone();
            if !active.reply.is_empty() {
                messages.push(Message::new(Role::Assistant, &active.reply));
            }
            return messages;
        }
        self.chats
            .selected()
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn error_state(&self) -> &ErrorState {
        &self.error
    }

    /// Whether the selected chat should show the retry affordance
    pub fn has_error(&self) -> bool {
        self.error.has_error && self.error.chat_id == self.chats.selected_chat_id()
    }

    /// Send a user message on the selected chat. The message is
    /// committed right away so a failed exchange can be retried.
    pub fn send(&mut self, content: &str) -> Result<Exchange, ControllerError> {
        self.check_ready()?;
        if content.trim().is_empty() {
            return Err(ControllerError::EmptyMessage);
        }
        let chat_id = self.ensure_selected();
        if self.is_streaming(&chat_id) {
            return Err(ControllerError::StreamInProgress(chat_id));
        }

        let mut messages = self
            .chats
            .get(&chat_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        messages.push(Message::new(Role::User, content));
        self.chats.append_messages(&chat_id, messages.clone());

        Ok(self.begin(&chat_id, messages))
    }

    /// Replay the selected chat without its trailing assistant reply.
    /// The stored history is left alone until the replay commits.
    pub fn retry(&mut self) -> Result<Exchange, ControllerError> {
        self.check_ready()?;
        let chat_id = self.chats.selected_chat_id().to_string();
        if self.is_streaming(&chat_id) {
            return Err(ControllerError::StreamInProgress(chat_id));
        }
        let mut messages = self
            .chats
            .get(&chat_id)
            .map(|c| c.messages.clone())
            .ok_or(ControllerError::NothingToRetry)?;

        if messages.last().is_some_and(|m| m.role == Role::Assistant) {
            messages.pop();
        }
        if !messages.last().is_some_and(|m| m.role == Role::User) {
            return Err(ControllerError::NothingToRetry);
        }
        // History is only rewritten once the replay finishes
        Ok(self.begin(&chat_id, messages))
    }

    fn begin(&mut self, chat_id: &str, messages: Vec<Message>) -> Exchange {
        self.error = ErrorState {
            has_error: false,
            chat_id: chat_id.to_string(),
        };

        let request = self.build_request(chat_id, &messages);
        let stop = CancellationToken::new();
        self.streams.insert(
            chat_id.to_string(),
            ActiveStream {
                messages,
                reply: String::new(),
                stop: stop.clone(),
            },
        );
        tracing::debug!("Started streaming on chat {}", chat_id);

        Exchange {
            chat_id: chat_id.to_string(),
            request,
            stop,
        }
    }

    /// The chat's own prompt wins over the selected prompt.
    fn system_prompt(&self, chat: Option<&Chat>) -> String {
        let prompt = chat
            .and_then(|c| c.user_prompt.clone())
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.prompts.selected().prompt.clone());
        resolve_date(&prompt, &current_date())
    }

    pub fn build_request(&self, chat_id: &str, messages: &[Message]) -> CompletionRequest {
        let chat = self.chats.get(chat_id);
        let settings = chat
            .map(|c| c.settings(&self.defaults))
            .unwrap_or_else(|| Chat::new().settings(&self.defaults));
        let sampling = !is_reasoning_model(&settings.model);

        CompletionRequest {
            messages: messages.iter().map(openai::Message::from).collect(),
            user_prompt: Some(self.system_prompt(chat)),
            temperature: sampling.then_some(settings.temperature),
            top_p: sampling.then_some(settings.top_p),
            max_tokens: Some(settings.max_tokens),
            channel: Some(settings.channel),
            model: Some(settings.model),
        }
    }

    pub fn push_chunk(&mut self, chat_id: &str, chunk: &str) {
        if let Some(active) = self.streams.get_mut(chat_id) {
            active.reply.push_str(chunk);
        }
    }

    /// Ask the stream on `chat_id` to stop. Whatever arrived so far is
    /// committed as if the stream had ended.
    pub fn stop(&self, chat_id: &str) -> bool {
        match self.streams.get(chat_id) {
            Some(active) => {
                active.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Commit the streamed reply. Returns `None` if `chat_id` wasn't
    /// streaming.
    pub fn finish(&mut self, chat_id: &str) -> Option<Finished> {
        let active = self.streams.remove(chat_id)?;
        let mut messages = active.messages;
        if !active.reply.is_empty() {
            messages.push(Message::new(Role::Assistant, &active.reply));
        }
        self.chats.append_messages(chat_id, messages.clone());

        let wants_title = messages.len() >= 2
            && self
                .chats
                .get(chat_id)
                .is_some_and(|c| c.has_default_title())
            && !self.pending_titles.contains(chat_id);
        let title_request = if wants_title {
            self.pending_titles.insert(chat_id.to_string());
            Some(messages.iter().map(openai::Message::from).collect())
        } else {
            None
        };

        tracing::debug!("Committed {} messages on chat {}", messages.len(), chat_id);

        Some(Finished {
            chat_id: chat_id.to_string(),
            messages,
            title_request,
        })
    }

    /// Record a failed stream. The user's message stays in the chat.
    pub fn fail(&mut self, chat_id: &str, err: &Error) {
        tracing::warn!("Completion failed for chat {}: {}", chat_id, err);
        self.streams.remove(chat_id);
        self.error = ErrorState {
            has_error: true,
            chat_id: chat_id.to_string(),
        };
    }

    /// Store a generated title. Failures leave the default title.
    pub fn apply_title(&mut self, chat_id: &str, result: Result<String, Error>) {
        self.pending_titles.remove(chat_id);
        match result {
            Ok(title) => {
                let title = strip_quotes(&title);
                if title.is_empty() {
                    tracing::warn!("Ignoring empty title for chat {}", chat_id);
                    return;
                }
                self.chats.update_field(chat_id, ChatField::Title(title));
            }
            Err(e) => tracing::error!("Title generation failed for chat {}: {}", chat_id, e),
        }
    }

    fn check_ready(&self) -> Result<(), ControllerError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ControllerError::NotHydrated)
        }
    }

    fn selected_id(&self) -> Result<String, ControllerError> {
        self.check_ready()?;
        self.chats
            .selected()
            .map(|c| c.id.clone())
            .ok_or(ControllerError::NoChatSelected)
    }

    fn reset_error(&mut self) {
        self.error = ErrorState {
            has_error: false,
            chat_id: self.chats.selected_chat_id().to_string(),
        };
    }
}

/// Trim whitespace and surrounding quote characters.
pub fn strip_quotes(title: &str) -> String {
    title
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
        .trim()
        .to_string()
}
