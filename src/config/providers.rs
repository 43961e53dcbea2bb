// Builtin AI provider presets
//
// Model strings take the form `provider/model`. OpenRouter model names
// contain a slash of their own, so only the first segment names the provider.

use serde::{Deserialize, Serialize};

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions
    OpenAiChat,
}

/// A builtin AI provider preset
/// Note: This is hardcoded data, not deserialized from files
#[derive(Debug, Clone)]
pub struct ApiProviderPreset {
    /// Provider ID (e.g., "anthropic", "groq")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Base URL for the API
    pub base_url: &'static str,
    pub style: ApiStyle,
}

/// Provider used when a model string has no prefix
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Builtin AI provider presets
pub static PROVIDERS: &[ApiProviderPreset] = &[
    ApiProviderPreset {
        id: "anthropic",
        name: "Anthropic",
        base_url: "https://api.anthropic.com/v1",
        style: ApiStyle::Anthropic,
    },
    ApiProviderPreset {
        id: "openai",
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        style: ApiStyle::OpenAiChat,
    },
    ApiProviderPreset {
        id: "groq",
        name: "Groq",
        base_url: "https://api.groq.com/openai/v1",
        style: ApiStyle::OpenAiChat,
    },
    ApiProviderPreset {
        id: "openrouter",
        name: "OpenRouter",
        base_url: "https://openrouter.ai/api/v1",
        style: ApiStyle::OpenAiChat,
    },
];

/// Get a provider preset by ID
pub fn get_provider_preset(id: &str) -> Option<&'static ApiProviderPreset> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Split `provider/model` into its parts.
///
/// A model without a known provider prefix belongs to the default provider.
pub fn split_model(model: &str) -> (&str, &str) {
    match model.split_once('/') {
        Some((provider, name)) if get_provider_preset(provider).is_some() => (provider, name),
        _ => (DEFAULT_PROVIDER, model),
    }
}
