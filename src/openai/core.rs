use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

/// Model and sampling parameters for a single completion. Sampling
/// parameters that are `None` are left out of the request.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionParams {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }
}

fn payload(messages: &[Message], params: &CompletionParams, stream: bool) -> Value {
    let mut payload = json!({
        "model": params.model,
        "messages": messages,
    });
    if stream {
        payload["stream"] = json!(true);
    }
    if let Some(temperature) = params.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(top_p) = params.top_p {
        payload["top_p"] = json!(top_p);
    }
    if let Some(max_tokens) = params.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

/// Non-streaming chat completion. Returns the assistant's text.
pub async fn completion(
    messages: &[Message],
    params: &CompletionParams,
    api_hostname: &str,
    api_key: &str,
) -> Result<String, Error> {
    let url = format!("{}/v1/chat/completions", api_hostname.trim_end_matches("/"));
    let response: Value = reqwest::Client::new()
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 10))
        .json(&payload(messages, params, false))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    response["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or(anyhow!("No message received. Resp:\n\n {}", response))
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<CompletionChunkChoice>,
}

/// Take the longest valid UTF-8 prefix out of `bytes`, leaving a
/// trailing partial character in place for the next network chunk.
pub(crate) fn drain_utf8(bytes: &mut Vec<u8>) -> Result<String, Error> {
    let valid_up_to = match std::str::from_utf8(bytes.as_slice()) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => return Err(e.into()),
    };
    let rest = bytes.split_off(valid_up_to);
    let text = String::from_utf8(std::mem::replace(bytes, rest))?;
    Ok(text)
}

/// Streaming chat completion. Each content delta is sent to `tx` as
/// it arrives and the full text is returned once the stream ends.
pub async fn completion_stream(
    tx: mpsc::UnboundedSender<String>,
    messages: &[Message],
    params: &CompletionParams,
    api_hostname: &str,
    api_key: &str,
) -> Result<String, Error> {
    let url = format!("{}/v1/chat/completions", api_hostname.trim_end_matches("/"));
    let response = reqwest::Client::new()
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 5))
        .json(&payload(messages, params, true))
        .send()
        .await?
        .error_for_status()?;

    let mut stream = response.bytes_stream();

    let mut content_buf = String::new();
    let mut bytes = Vec::new();
    let mut buffer = String::new();

    'outer: while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(&chunk?);

        // Append new data to buffer. This is necessary to handle SSE
        // fragmentation over HTTP/2 frames.
        buffer.push_str(&drain_utf8(&mut bytes)?);

        // Process all complete SSE events from the buffer
        while let Some(event_end) = buffer.find("\n\n") {
            let event_data = buffer[..event_end].to_string();
            buffer = buffer[event_end + 2..].to_string();

            let event_data = event_data.trim();
            let Some(data) = event_data.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            if data == "[DONE]" {
                break 'outer;
            }

            let chunk = serde_json::from_str::<CompletionChunk>(data).inspect_err(|e| {
                tracing::error!("Parsing completion chunk failed for {}\nError:{}", data, e)
            })?;
            let Some(choice) = chunk.choices.first() else {
                continue;
            };

            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                content_buf.push_str(content);
                // The receiver may have gone away. Keep reading so the
                // full text is still returned.
                let _ = tx.send(content.clone());
            }
        }
    }

    Ok(content_buf)
}

#[derive(Clone, Debug)]
pub struct ImageParams {
    pub model: String,
    pub size: String,
    pub style: String,
    pub quality: String,
}

impl Default for ImageParams {
    fn default() -> Self {
        // dall-e-3 only generates one image per request
        Self {
            model: String::from("dall-e-3"),
            size: String::from("1024x1024"),
            style: String::from("vivid"),
            quality: String::from("standard"),
        }
    }
}

/// Generate an image and return its URL.
pub async fn generate_image(
    prompt: &str,
    params: &ImageParams,
    api_hostname: &str,
    api_key: &str,
) -> Result<String, Error> {
    let url = format!("{}/v1/images/generations", api_hostname.trim_end_matches("/"));
    let response: Value = reqwest::Client::new()
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 2))
        .json(&json!({
            "model": params.model,
            "prompt": prompt,
            "n": 1,
            "size": params.size,
            "style": params.style,
            "quality": params.quality,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    response["data"][0]["url"]
        .as_str()
        .map(String::from)
        .ok_or(anyhow!("No image URL received. Resp:\n\n {}", response))
}
