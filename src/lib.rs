pub mod api;
pub mod chat;
pub mod cli;
pub mod client;
pub mod context;
pub mod core;
pub mod openai;
pub mod prompt;
pub mod store;
