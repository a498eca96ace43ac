//! Router for the chat API

use std::sync::{Arc, RwLock};

use anyhow::{Error, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::public;
use crate::api::state::AppState;
use crate::chat::CompletionStream;
use crate::context::augment_system_prompt;

type SharedState = Arc<RwLock<AppState>>;

/// Stream the assistant reply for a conversation as plain text
async fn chat_handler(
    State(state): State<SharedState>,
    Json(mut payload): Json<public::ChatRequest>,
) -> Result<impl IntoResponse, crate::api::public::ApiError> {
    if payload.messages.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "No messages to complete").into_response());
    }

    let (client, url_context) = {
        let shared_state = state.read().expect("Unable to read share state");
        (shared_state.openai.clone(), shared_state.config.url_context)
    };

    if url_context {
        let system = augment_system_prompt(&payload.system_prompt(), &payload.messages).await;
        payload.user_prompt = Some(system);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (done_tx, done_rx) = oneshot::channel::<Result<(), Error>>();

    tokio::spawn(async move {
        let disconnected = tx.clone();
        // Abandon the upstream request once the response body is dropped
        let result = tokio::select! {
            result = client.stream(&payload, tx) => result,
            _ = disconnected.closed() => Err(anyhow!("Client disconnected")),
        };
        drop(disconnected);
        if let Err(e) = &result {
            tracing::error!("Chat completion failed: {}", e);
        }
        let _ = done_tx.send(result);
    });

    // Fail with a status code when nothing was produced
    let Some(first) = rx.recv().await else {
        return match done_rx.await {
            Ok(Ok(())) => Ok((
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                String::new(),
            )
                .into_response()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow!("Completion task ended unexpectedly").into()),
        };
    };

    // An error after the first chunk aborts the body so the client
    // sees a broken stream rather than a short reply
    let tail = futures::stream::once(async move {
        match done_rx.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Err(e)),
            Err(_) => Some(Err(anyhow!("Completion task ended unexpectedly"))),
        }
    })
    .filter_map(|item| async move { item });

    let body = futures::stream::once(async move { Ok::<String, Error>(first) })
        .chain(UnboundedReceiverStream::new(rx).map(Ok::<String, Error>))
        .chain(tail);

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(chat_handler))
}
