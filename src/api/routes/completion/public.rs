//! Public types for the completion API
use serde::{Deserialize, Serialize};

use crate::openai::Message;

#[derive(Deserialize, Serialize)]
pub struct TitleRequest {
    pub messages: Vec<Message>,
}

#[derive(Deserialize, Serialize)]
pub struct TitleResponse {
    pub title: String,
}
