//! Router for the completion API

use std::sync::{Arc, RwLock};

use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post,
};

use super::public;
use crate::api::state::AppState;
use crate::chat::TitleGenerator;

type SharedState = Arc<RwLock<AppState>>;

/// Generate a short title for a conversation
async fn title_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::TitleRequest>,
) -> Result<impl IntoResponse, crate::api::public::ApiError> {
    if payload.messages.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "No messages to title").into_response());
    }

    let client = state
        .read()
        .expect("Unable to read share state")
        .openai
        .clone();
    let title = client.generate_title(&payload.messages).await?;

    Ok(Json(public::TitleResponse { title }).into_response())
}

/// Create the completion router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(title_handler))
}
