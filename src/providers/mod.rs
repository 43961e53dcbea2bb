// AI and sandbox provider interfaces
//
// The engine only talks to these traits. Concrete clients: Anthropic and
// OpenAI-compatible streaming chat for AI, a directory-backed sandbox for
// file and command I/O.

pub mod anthropic;
pub mod event_stream;
pub mod local_sandbox;
pub mod openai;

use crate::config::providers::{get_provider_preset, split_model, ApiStyle};
use crate::config::AiConfig;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use local_sandbox::LocalSandbox;
pub use openai::OpenAiCompatibleProvider;

// ============================================================================
// AI provider
// ============================================================================

/// AI provider error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Cannot connect to AI provider: {0}")]
    Connection(String),

    #[error("Invalid or expired API key: {0}")]
    Auth(String),

    #[error("AI provider rate limit exceeded")]
    RateLimited,

    #[error("AI provider error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed provider stream: {0}")]
    Stream(String),

    #[error("No API key configured for provider '{0}'")]
    MissingApiKey(String),

    #[error("Unknown AI provider '{0}'")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Transient failures worth another attempt before any output arrived
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Connection(_) | ProviderError::RateLimited => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// Prompt and context for one generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Model name without the provider prefix
    pub model: String,
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Lazy, finite, non-restartable sequence of text tokens
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Trait for AI providers
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Start a generation and return its token stream
    async fn stream_tokens(&self, request: GenerationRequest) -> Result<TokenStream, ProviderError>;
}

/// Bounded exponential backoff for connecting to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `send` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent
    pub async fn run<T, F, Fut>(&self, provider: &str, mut send: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match send().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "[{}] Attempt {} failed ({}), retrying in {:?}",
                        provider,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn status_error(status: u16, body: &str) -> ProviderError {
    let message = crate::utils::truncate_string(body.trim(), 500).to_string();
    match status {
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::RateLimited,
        _ => ProviderError::Api { status, message },
    }
}

/// Create the provider named by a `provider/model` string.
///
/// Returns the provider together with the bare model name.
pub fn create_provider(
    model: &str,
    config: &AiConfig,
) -> Result<(Arc<dyn AiProvider>, String), ProviderError> {
    let (provider_id, model_name) = split_model(model);
    let preset = get_provider_preset(provider_id)
        .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))?;

    let api_key = config
        .api_keys
        .get(provider_id)
        .filter(|k| !k.trim().is_empty())
        .cloned()
        .ok_or_else(|| ProviderError::MissingApiKey(provider_id.to_string()))?;

    let base_url = config
        .base_urls
        .get(provider_id)
        .cloned()
        .unwrap_or_else(|| preset.base_url.to_string());
    let retry = RetryPolicy::from_config(config);

    let provider: Arc<dyn AiProvider> = match preset.style {
        ApiStyle::Anthropic => Arc::new(AnthropicProvider::new(base_url, api_key, retry)),
        ApiStyle::OpenAiChat => Arc::new(OpenAiCompatibleProvider::new(
            preset.name,
            base_url,
            api_key,
            retry,
        )),
    };

    Ok((provider, model_name.to_string()))
}

// ============================================================================
// Sandbox provider
// ============================================================================

/// Failure reported by a sandbox provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sandbox error: {reason}")]
pub struct SandboxError {
    pub reason: String,
}

impl SandboxError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path relative to the sandbox root, `/`-separated
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Progress of a package installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallProgress {
    Output(String),
    Finished { packages: Vec<String> },
}

pub type InstallStream = Pin<Box<dyn Stream<Item = Result<InstallProgress, SandboxError>> + Send>>;

/// Trait for sandbox providers
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Identifier of the sandbox (usually the project id)
    fn id(&self) -> &str;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError>;

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError>;

    /// Install packages; the stream ends with `Finished` or an error
    async fn install_packages(&self, names: &[String]) -> Result<InstallStream, SandboxError>;

    async fn restart_dev_server(&self) -> Result<(), SandboxError>;

    /// Release the sandbox; later calls fail
    async fn terminate(&self) -> Result<(), SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8000),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(8000));
        assert_eq!(policy.backoff(40), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ProviderError::Connection("reset".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::RateLimited)
            })
            .await;
        assert_eq!(result, Err(ProviderError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Auth("bad key".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(401, "no"), ProviderError::Auth(_)));
        assert_eq!(status_error(429, ""), ProviderError::RateLimited);
        assert!(status_error(503, "down").is_retryable());
        assert!(!status_error(400, "bad").is_retryable());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = AiConfig::default();
        let err = create_provider("openai/gpt-4o", &config).err().unwrap();
        assert_eq!(err, ProviderError::MissingApiKey("openai".to_string()));
    }

    #[test]
    fn test_create_provider_with_key() {
        let mut config = AiConfig::default();
        config
            .api_keys
            .insert("groq".to_string(), "gsk-test".to_string());
        let (provider, model) = create_provider("groq/llama-3.3-70b-versatile", &config).unwrap();
        assert_eq!(provider.name(), "Groq");
        assert_eq!(model, "llama-3.3-70b-versatile");
    }
}
