//! Client for the server's `/api` routes, used by the terminal chat.

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::{CompletionRequest, CompletionStream, TitleGenerator};
use crate::openai::{Message, drain_utf8};

#[derive(Serialize)]
struct TitleRequest<'a> {
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct TitleResponse {
    title: String,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

#[async_trait]
impl CompletionStream for ApiClient {
    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<(), Error> {
        let response = self
            .client
            .post(self.url("/chat"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chat request failed with {}: {}", status, body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(item) = stream.next().await {
            buffer.extend_from_slice(&item?);
            let text = drain_utf8(&mut buffer)?;
            if !text.is_empty() {
                tx.send(text)?;
            }
        }

        if !buffer.is_empty() {
            return Err(anyhow!("Response ended in the middle of a character"));
        }

        Ok(())
    }
}

#[async_trait]
impl TitleGenerator for ApiClient {
    async fn generate_title(&self, messages: &[Message]) -> Result<String, Error> {
        let response: TitleResponse = self
            .client
            .post(self.url("/completion"))
            .json(&TitleRequest { messages })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.title)
    }
}
