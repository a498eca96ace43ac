//! The persisted collection of chats and the current selection.
//!
//! Every operation is total: unknown ids are ignored rather than
//! treated as errors. Each mutation is written through to the store
//! before returning.

use serde::{Deserialize, Serialize};

use super::models::{Chat, ChatField, Message};
use crate::store::{CHATS_STORE, SharedStore};

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatsState {
    // Most recently created first
    chat_list: Vec<Chat>,
    selected_chat_id: String,
}

pub struct ChatRegistry {
    store: SharedStore,
    state: ChatsState,
    hydrated: bool,
}

impl ChatRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            state: ChatsState::default(),
            hydrated: false,
        }
    }

    /// Load the persisted chats. Until this completes the registry
    /// reports `is_hydrated() == false`.
    pub async fn hydrate(&mut self) {
        tokio::task::yield_now().await;

        match self.store.get(CHATS_STORE) {
            Ok(Some(blob)) => match serde_json::from_str::<ChatsState>(&blob) {
                Ok(mut state) => {
                    if !state.selected_chat_id.is_empty()
                        && !state.chat_list.iter().any(|c| c.id == state.selected_chat_id)
                    {
                        tracing::warn!(
                            "Persisted selection {} doesn't exist, clearing it",
                            state.selected_chat_id
                        );
                        state.selected_chat_id = String::new();
                    }
                    self.state = state;
                }
                Err(e) => tracing::error!("Failed to parse persisted chats, starting empty: {}", e),
            },
            Ok(None) => tracing::debug!("No persisted chats found"),
            Err(e) => tracing::error!("Failed to read persisted chats: {}", e),
        }

        self.hydrated = true;
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn chats(&self) -> &[Chat] {
        &self.state.chat_list
    }

    pub fn get(&self, id: &str) -> Option<&Chat> {
        self.state.chat_list.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Chat> {
        self.state.chat_list.iter_mut().find(|c| c.id == id)
    }

    /// Empty when no chat is selected
    pub fn selected_chat_id(&self) -> &str {
        &self.state.selected_chat_id
    }

    pub fn selected(&self) -> Option<&Chat> {
        self.get(&self.state.selected_chat_id)
    }

    /// Start a new chat at the front of the list and select it.
    pub fn create_chat(&mut self) -> Chat {
        let chat = Chat::new();
        self.state.chat_list.insert(0, chat.clone());
        self.state.selected_chat_id = chat.id.clone();
        self.persist();
        chat
    }

    /// Select a chat and return its messages so they can be loaded
    /// into the active buffer. Returns `None` for unknown ids.
    pub fn select_chat(&mut self, id: &str) -> Option<Vec<Message>> {
        let messages = self.get(id)?.messages.clone();
        if self.state.selected_chat_id != id {
            self.state.selected_chat_id = id.to_string();
            self.persist();
        }
        Some(messages)
    }

    /// Replace the chat's messages with `messages`. Callers always pass
    /// the complete list; the last write wins.
    pub fn append_messages(&mut self, chat_id: &str, messages: Vec<Message>) {
        let Some(chat) = self.get_mut(chat_id) else {
            tracing::debug!("Ignoring messages for unknown chat {}", chat_id);
            return;
        };
        chat.messages = messages;
        self.persist();
    }

    pub fn update_field(&mut self, chat_id: &str, field: ChatField) {
        let Some(chat) = self.get_mut(chat_id) else {
            tracing::debug!("Ignoring update for unknown chat {}", chat_id);
            return;
        };
        field.apply(chat);
        self.persist();
    }

    /// Remove a chat. If it was selected, the first remaining chat
    /// becomes selected or the selection is cleared.
    pub fn delete_chat(&mut self, id: &str) {
        let Some(idx) = self.state.chat_list.iter().position(|c| c.id == id) else {
            return;
        };
        self.state.chat_list.remove(idx);

        if self.state.selected_chat_id == id {
            self.state.selected_chat_id = self
                .state
                .chat_list
                .first()
                .map(|c| c.id.clone())
                .unwrap_or_default();
        }
        self.persist();
    }

    fn persist(&self) {
        let blob = match serde_json::to_string(&self.state) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::error!("Failed to serialize chats: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(CHATS_STORE, &blob) {
            tracing::error!("Failed to persist chats: {}", e);
        }
    }
}
