use std::env;
use std::str::FromStr;

/// Maximum output tokens for models that aren't in the catalogue
pub const FALLBACK_MAX_TOKENS: u32 = 4_096;

#[derive(Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub value: &'static str,
    pub max_tokens: u32,
}

/// Hardcoded list of the models that can be selected for a chat.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "OpenAI GPT-4o",
        value: "gpt-4o-2024-08-06",
        max_tokens: 16_384,
    },
    ModelInfo {
        name: "OpenAI GPT-4o Mini",
        value: "gpt-4o-mini-2024-07-18",
        max_tokens: 16_384,
    },
    ModelInfo {
        name: "OpenAI GPT o1 Mini",
        value: "o1-mini",
        max_tokens: 32_768,
    },
    ModelInfo {
        name: "OpenAI GPT o1 Preview",
        value: "o1-preview",
        max_tokens: 32_768,
    },
];

pub fn find_model(value: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.value == value)
}

/// The o1 family ignores sampling parameters and can't be streamed.
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1-")
}

/// Clamp the requested output tokens to what the model supports.
pub fn clamp_max_tokens(model: &str, max_tokens: u32) -> u32 {
    let limit = find_model(model)
        .map(|m| m.max_tokens)
        .unwrap_or(FALLBACK_MAX_TOKENS);
    max_tokens.min(limit)
}

/// Process-wide generation settings. Per-chat settings fall back to
/// these when they aren't set.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationDefaults {
    pub model: String,
    pub channel: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            model: String::from("gpt-4o-2024-08-06"),
            channel: String::from("default"),
            temperature: 0.5,
            top_p: 0.9,
            max_tokens: 16_384,
        }
    }
}

impl GenerationDefaults {
    pub fn from_env() -> Self {
        let fallback = Self::default();
        Self {
            model: env::var("BULLSAI_MODEL").unwrap_or(fallback.model),
            channel: env::var("BULLSAI_CHANNEL").unwrap_or(fallback.channel),
            temperature: parse_env("BULLSAI_TEMPERATURE").unwrap_or(fallback.temperature),
            top_p: parse_env("BULLSAI_TOP_P").unwrap_or(fallback.top_p),
            max_tokens: parse_env("BULLSAI_MAX_TOKENS").unwrap_or(fallback.max_tokens),
        }
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_path: String,
    pub db_path: String,
    pub openai_api_hostname: String,
    pub openai_api_key: String,
    pub title_model: String,
    pub image_model: String,
    pub url_context: bool,
    pub defaults: GenerationDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        let storage_path = env::var("BULLSAI_STORAGE_PATH").unwrap_or("./".to_string());
        let db_path = format!("{}/bullsai.db", storage_path.trim_end_matches('/'));
        let openai_api_hostname = env::var("BULLSAI_LLM_HOST")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let openai_api_key =
            env::var("OPENAI_API_KEY").unwrap_or_else(|_| "thiswontworkforopenai".to_string());
        let title_model = env::var("BULLSAI_TITLE_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let image_model =
            env::var("BULLSAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".to_string());
        let url_context = env::var("BULLSAI_URL_CONTEXT")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            storage_path,
            db_path,
            openai_api_hostname,
            openai_api_key,
            title_model,
            image_model,
            url_context,
            defaults: GenerationDefaults::from_env(),
        }
    }
}
