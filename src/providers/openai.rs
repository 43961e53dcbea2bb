// OpenAI-compatible chat completions streaming client (OpenAI, Groq, OpenRouter)

use super::event_stream::{connect, token_stream, SseAction};
use super::{AiProvider, GenerationRequest, ProviderError, RetryPolicy, TokenStream};
use async_trait::async_trait;
use serde_json::json;

pub struct OpenAiCompatibleProvider {
    name: &'static str,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &'static str, base_url: String, api_key: String, retry: RetryPolicy) -> Self {
        Self {
            name,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        }
    }

    /// The system prompt travels as the first chat message
    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        );

        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        })
    }
}

pub(crate) fn extract_token(_event: &str, data: &str) -> Result<SseAction, ProviderError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseAction::Done);
    }
    if data.is_empty() {
        return Ok(SseAction::Skip);
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("Invalid chunk JSON: {}", e)))?;

    if let Some(message) = value["error"]["message"].as_str() {
        return Err(ProviderError::Stream(message.to_string()));
    }

    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(SseAction::Token(text.to_string())),
        _ => Ok(SseAction::Skip),
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn stream_tokens(&self, request: GenerationRequest) -> Result<TokenStream, ProviderError> {
        let url = &format!("{}/chat/completions", self.base_url);
        let body = &Self::request_body(&request);

        log::debug!("[{}] Streaming model {}", self.name, request.model);

        let source = self
            .retry
            .run(self.name, move || {
                connect(self.client.post(url).bearer_auth(&self.api_key).json(body))
            })
            .await?;

        Ok(token_stream(source, extract_token))
    }
}
