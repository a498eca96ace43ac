//! Public types for the images API
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_url: String,
}
