use anyhow::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use super::core::{CompletionParams, Message, Role, completion, completion_stream};
use crate::chat::{CompletionRequest, CompletionStream, TitleGenerator};
use crate::core::config::{GenerationDefaults, clamp_max_tokens, is_reasoning_model};
use crate::prompt::{Template, templates};

/// Talks to an OpenAI compatible API on behalf of the proxy routes.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_hostname: String,
    api_key: String,
    title_model: String,
    defaults: GenerationDefaults,
}

impl OpenAiClient {
    pub fn new(
        api_hostname: &str,
        api_key: &str,
        title_model: &str,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            api_hostname: api_hostname.to_string(),
            api_key: api_key.to_string(),
            title_model: title_model.to_string(),
            defaults,
        }
    }

    /// Upstream parameters for a request, filling in defaults.
    /// Reasoning models reject sampling parameters and `max_tokens`, so
    /// those are dropped with a debug log.
    pub fn params(&self, request: &CompletionRequest) -> CompletionParams {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.defaults.model.clone());
        let max_tokens = clamp_max_tokens(
            &model,
            request.max_tokens.unwrap_or(self.defaults.max_tokens),
        );
        if is_reasoning_model(&model) {
            tracing::debug!(
                "Ignoring max_tokens {} and sampling parameters for {}",
                max_tokens,
                model
            );
            return CompletionParams {
                max_tokens: None,
                ..CompletionParams::new(&model)
            };
        }
        CompletionParams {
            temperature: Some(request.temperature.unwrap_or(self.defaults.temperature)),
            top_p: Some(request.top_p.unwrap_or(self.defaults.top_p)),
            max_tokens: Some(max_tokens),
            model,
        }
    }
}

#[async_trait]
impl CompletionStream for OpenAiClient {
    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<(), Error> {
        let params = self.params(request);
        let mut messages = vec![Message::new(Role::System, &request.system_prompt())];
        messages.extend(request.messages.iter().cloned());

        tracing::debug!(
            "Requesting completion from {} with {} messages",
            params.model,
            messages.len()
        );

        if is_reasoning_model(&params.model) {
            // Delivered in one piece since these models can't stream
            let content = completion(&messages, &params, &self.api_hostname, &self.api_key).await?;
            let _ = tx.send(content);
        } else {
            completion_stream(tx, &messages, &params, &self.api_hostname, &self.api_key).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TitleGenerator for OpenAiClient {
    async fn generate_title(&self, messages: &[Message]) -> Result<String, Error> {
        let prompt = templates().render(
            &Template::ChatTitle.to_string(),
            &json!({"messages": serde_json::to_string(messages)?}),
        )?;
        let title = completion(
            &[Message::new(Role::User, &prompt)],
            &CompletionParams::new(&self.title_model),
            &self.api_hostname,
            &self.api_key,
        )
        .await?;
        Ok(title.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> OpenAiClient {
        OpenAiClient::new(url, "test-key", "gpt-4o", GenerationDefaults::default())
    }

    #[test]
    fn test_params_fill_defaults() {
        let params = client("http://localhost").params(&CompletionRequest::default());
        assert_eq!(params.model, "gpt-4o-2024-08-06");
        assert_eq!(params.temperature, Some(0.5));
        assert_eq!(params.top_p, Some(0.9));
        assert_eq!(params.max_tokens, Some(16_384));
    }

    #[test]
    fn test_params_for_reasoning_model() {
        let request = CompletionRequest {
            model: Some(String::from("o1-mini")),
            temperature: Some(1.0),
            ..Default::default()
        };
        let params = client("http://localhost").params(&request);
        assert_eq!(params, CompletionParams::new("o1-mini"));
    }

    #[tokio::test]
    async fn test_stream_prepends_system_prompt() {
        let mut server = mockito::Server::new_async().await;
        let sse_response = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-4o-2024-08-06",
                "stream": true,
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_response)
            .create();

        let request = CompletionRequest {
            messages: vec![Message::new(Role::User, "Hello")],
            user_prompt: Some(String::from("Be brief")),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        client(&server.url()).stream(&request, tx).await.unwrap();

        mock.assert();
        assert_eq!(rx.recv().await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn test_reasoning_model_is_not_streamed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "o1-mini"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Thought about it"}}]}"#)
            .create();

        let request = CompletionRequest {
            messages: vec![Message::new(Role::User, "Hello")],
            model: Some(String::from("o1-mini")),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        client(&server.url()).stream(&request, tx).await.unwrap();

        mock.assert();
        assert_eq!(rx.recv().await.unwrap(), "Thought about it");
    }

    #[tokio::test]
    async fn test_generate_title() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Regex(String::from(
                "Generate a short \\(5-7 words\\) chat title",
            )))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":" \"Friendly Greetings\" "}}]}"#)
            .create();

        let messages = vec![
            Message::new(Role::User, "Hello"),
            Message::new(Role::Assistant, "Hi there"),
        ];
        let title = client(&server.url())
            .generate_title(&messages)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(title, "\"Friendly Greetings\"");
    }
}
