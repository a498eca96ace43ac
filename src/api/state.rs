use crate::core::AppConfig;
use crate::openai::OpenAiClient;

pub struct AppState {
    pub config: AppConfig,
    pub openai: OpenAiClient,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let openai = OpenAiClient::new(
            &config.openai_api_hostname,
            &config.openai_api_key,
            &config.title_model,
            config.defaults.clone(),
        );
        Self { config, openai }
    }
}
