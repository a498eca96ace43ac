//! API routes module

pub mod chat;
pub mod completion;
pub mod images;

use std::sync::{Arc, RwLock};

use crate::api::state::AppState;
use axum::Router;

type SharedState = Arc<RwLock<AppState>>;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Streaming chat completions
        .nest("/chat", chat::router())
        // Chat titles
        .nest("/completion", completion::router())
        // Image generation
        .nest("/images", images::router())
}
