// Anthropic Messages API streaming client

use super::event_stream::{connect, token_stream, SseAction};
use super::{AiProvider, GenerationRequest, ProviderError, RetryPolicy, TokenStream};
use async_trait::async_trait;
use serde_json::json;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(base_url: String, api_key: String, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        }
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        json!({
            "model": request.model,
            "system": request.system,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        })
    }
}

/// Map one Anthropic stream event to a token
pub(crate) fn extract_token(kind: &str, data: &str) -> Result<SseAction, ProviderError> {
    match kind {
        "message_stop" => return Ok(SseAction::Done),
        "ping" | "message_start" | "message_delta" | "content_block_start"
        | "content_block_stop" => return Ok(SseAction::Skip),
        _ => {}
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("Invalid event JSON: {}", e)))?;

    match value["type"].as_str().unwrap_or(kind) {
        "content_block_delta" => match value["delta"]["text"].as_str() {
            Some(text) if !text.is_empty() => Ok(SseAction::Token(text.to_string())),
            _ => Ok(SseAction::Skip),
        },
        "message_stop" => Ok(SseAction::Done),
        "error" => {
            let message = value["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            match value["error"]["type"].as_str() {
                Some("rate_limit_error") => Err(ProviderError::RateLimited),
                Some("authentication_error") => Err(ProviderError::Auth(message)),
                _ => Err(ProviderError::Stream(message)),
            }
        }
        _ => Ok(SseAction::Skip),
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
    }

    async fn stream_tokens(&self, request: GenerationRequest) -> Result<TokenStream, ProviderError> {
        let url = &format!("{}/messages", self.base_url);
        let body = &Self::request_body(&request);

        log::debug!("[Anthropic] Streaming model {}", request.model);

        let source = self
            .retry
            .run("Anthropic", move || {
                connect(
                    self.client
                        .post(url)
                        .header("x-api-key", &self.api_key)
                        .header("anthropic-version", ANTHROPIC_VERSION)
                        .json(body),
                )
            })
            .await?;

        Ok(token_stream(source, extract_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PromptMessage, PromptRole};

    #[test]
    fn test_extract_text_delta() {
        let action = extract_token(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert_eq!(action, SseAction::Token("Hi".to_string()));
    }

    #[test]
    fn test_extract_control_events() {
        assert_eq!(
            extract_token("message_stop", r#"{"type":"message_stop"}"#).unwrap(),
            SseAction::Done
        );
        assert_eq!(
            extract_token("ping", r#"{"type":"ping"}"#).unwrap(),
            SseAction::Skip
        );
    }

    #[test]
    fn test_extract_error_event() {
        let err = extract_token(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert_eq!(err, ProviderError::Stream("Overloaded".to_string()));

        let err = extract_token(
            "error",
            r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
        )
        .unwrap_err();
        assert_eq!(err, ProviderError::RateLimited);
    }

    #[test]
    fn test_extract_uses_type_when_event_name_missing() {
        let action = extract_token(
            "message",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"x"}}"#,
        )
        .unwrap();
        assert_eq!(action, SseAction::Token("x".to_string()));
    }

    #[test]
    fn test_extract_invalid_json() {
        assert!(extract_token("content_block_delta", "{not json").is_err());
    }

    #[test]
    fn test_request_body() {
        let request = GenerationRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            system: "You build apps".to_string(),
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: "make a counter".to_string(),
            }],
            temperature: 0.5,
            max_tokens: 100,
        };
        let body = AnthropicProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "You build apps");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 100);
    }
}
