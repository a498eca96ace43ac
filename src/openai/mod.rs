mod client;
pub use client::OpenAiClient;

mod core;
pub(crate) use self::core::drain_utf8;
pub use self::core::{
    CompletionParams, ImageParams, Message, Role, completion, completion_stream, generate_image,
};
