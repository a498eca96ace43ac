//! Router for the images API

use std::sync::{Arc, RwLock};

use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post,
};

use super::public;
use crate::api::state::AppState;
use crate::core::AppConfig;
use crate::openai::{ImageParams, generate_image};

type SharedState = Arc<RwLock<AppState>>;

/// Generate an image from a text prompt
async fn image_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ImageRequest>,
) -> Result<impl IntoResponse, crate::api::public::ApiError> {
    if payload.prompt.trim().is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "Missing image prompt").into_response());
    }

    let (openai_api_hostname, openai_api_key, image_model) = {
        let shared_state = state.read().expect("Unable to read share state");
        let AppConfig {
            openai_api_hostname,
            openai_api_key,
            image_model,
            ..
        } = &shared_state.config;
        (
            openai_api_hostname.clone(),
            openai_api_key.clone(),
            image_model.clone(),
        )
    };

    let params = ImageParams {
        model: image_model,
        ..Default::default()
    };
    let image_url = generate_image(
        &payload.prompt,
        &params,
        &openai_api_hostname,
        &openai_api_key,
    )
    .await?;

    Ok(Json(public::ImageResponse { image_url }).into_response())
}

/// Create the images router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(image_handler))
}
