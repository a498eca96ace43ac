//! Public types for the chat API

/// Body of `POST /api/chat`. The reply streams back as plain text.
pub use crate::chat::CompletionRequest as ChatRequest;
