//! User-defined reusable system prompts.
//!
//! A reserved default prompt always exists and the selection always
//! points at an existing prompt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BASE_PROMPT, DEFAULT_PROMPT_ID};
use crate::store::{PROMPTS_STORE, SharedStore};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub tags: Vec<String>,
}

impl Prompt {
    pub fn default_prompt() -> Self {
        Self {
            id: DEFAULT_PROMPT_ID.to_string(),
            title: String::from("Default BullsAI prompt"),
            prompt: BASE_PROMPT.to_string(),
            tags: vec![String::from("default")],
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_PROMPT_ID
    }

    pub fn display_tags(&self) -> String {
        self.tags.join(", ")
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptsState {
    prompt_list: Vec<Prompt>,
    selected_prompt_id: String,
}

impl Default for PromptsState {
    fn default() -> Self {
        Self {
            prompt_list: vec![Prompt::default_prompt()],
            selected_prompt_id: DEFAULT_PROMPT_ID.to_string(),
        }
    }
}

pub struct PromptRegistry {
    store: SharedStore,
    state: PromptsState,
    hydrated: bool,
}

impl PromptRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            state: PromptsState::default(),
            hydrated: false,
        }
    }

    pub async fn hydrate(&mut self) {
        tokio::task::yield_now().await;

        match self.store.get(PROMPTS_STORE) {
            Ok(Some(blob)) => match serde_json::from_str::<PromptsState>(&blob) {
                Ok(state) => self.state = state,
                Err(e) => {
                    tracing::error!("Failed to parse persisted prompts, using defaults: {}", e)
                }
            },
            Ok(None) => tracing::debug!("No persisted prompts found"),
            Err(e) => tracing::error!("Failed to read persisted prompts: {}", e),
        }

        if !self.state.prompt_list.iter().any(Prompt::is_default) {
            self.state.prompt_list.push(Prompt::default_prompt());
        }
        if self.get(&self.state.selected_prompt_id).is_none() {
            self.state.selected_prompt_id = DEFAULT_PROMPT_ID.to_string();
        }

        self.hydrated = true;
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.state.prompt_list
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.state.prompt_list.iter().find(|p| p.id == id)
    }

    pub fn selected_prompt_id(&self) -> &str {
        &self.state.selected_prompt_id
    }

    pub fn selected(&self) -> &Prompt {
        // The selection invariant guarantees a hit, the fallback only
        // covers a hand-edited store
        self.get(&self.state.selected_prompt_id)
            .or_else(|| self.get(DEFAULT_PROMPT_ID))
            .unwrap_or_else(|| &self.state.prompt_list[0])
    }

    pub fn add_prompt(&mut self, title: &str, body: &str, tags: Vec<String>) -> String {
        let prompt = Prompt {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            prompt: body.to_string(),
            tags,
        };
        let id = prompt.id.clone();
        self.state.prompt_list.insert(0, prompt);
        self.persist();
        id
    }

    pub fn edit_prompt(&mut self, id: &str, title: &str, body: &str, tags: Vec<String>) {
        let Some(prompt) = self.state.prompt_list.iter_mut().find(|p| p.id == id) else {
            return;
        };
        prompt.title = title.to_string();
        prompt.prompt = body.to_string();
        prompt.tags = tags;
        self.persist();
    }

    /// Delete a prompt. The default prompt can't be deleted and
    /// deleting the selected prompt selects the default again.
    pub fn delete_prompt(&mut self, id: &str) {
        if id == DEFAULT_PROMPT_ID {
            tracing::debug!("Refusing to delete the default prompt");
            return;
        }
        let Some(idx) = self.state.prompt_list.iter().position(|p| p.id == id) else {
            return;
        };
        self.state.prompt_list.remove(idx);
        if self.state.selected_prompt_id == id {
            self.state.selected_prompt_id = DEFAULT_PROMPT_ID.to_string();
        }
        self.persist();
    }

    /// `None` resets the selection to the default prompt. Unknown ids
    /// are ignored.
    pub fn select_prompt(&mut self, id: Option<&str>) {
        let id = id.unwrap_or(DEFAULT_PROMPT_ID);
        if self.get(id).is_none() {
            return;
        }
        self.state.selected_prompt_id = id.to_string();
        self.persist();
    }

    fn persist(&self) {
        let blob = match serde_json::to_string(&self.state) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::error!("Failed to serialize prompts: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(PROMPTS_STORE, &blob) {
            tracing::error!("Failed to persist prompts: {}", e);
        }
    }
}
