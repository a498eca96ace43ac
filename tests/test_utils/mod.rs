//! Test utilities for integration tests
use std::sync::{Arc, RwLock};

use axum::{Router, body::Body};

use bullsai::api::AppState;
use bullsai::api::app;
use bullsai::core::{AppConfig, GenerationDefaults};

/// Config pointing every upstream call at `openai_api_hostname`
/// with storage in a fresh temporary directory.
pub fn test_config(openai_api_hostname: &str) -> AppConfig {
    let dir = tempfile::tempdir()
        .expect("Failed to create temp dir")
        .keep();
    let storage_path = dir.display().to_string();
    AppConfig {
        db_path: dir.join("bullsai.db").display().to_string(),
        storage_path,
        openai_api_hostname: openai_api_hostname.to_string(),
        openai_api_key: String::from("test-api-key"),
        title_model: String::from("gpt-4o"),
        image_model: String::from("dall-e-3"),
        url_context: false,
        defaults: GenerationDefaults::default(),
    }
}

/// Creates a test application router from `config`
pub fn test_app_with_config(config: AppConfig) -> Router {
    let app_state = AppState::new(config);
    app(Arc::new(RwLock::new(app_state)))
}

/// Creates a test application router backed by a mock upstream
pub fn test_app(openai_api_hostname: &str) -> Router {
    test_app_with_config(test_config(openai_api_hostname))
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Server-sent events for a streamed completion of `chunks`
pub fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        let event = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": chunk}}]
        });
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
