// Storage for AI provider API keys
//
// Keys are read from ~/.builder-engine/secrets.toml. Keys from config.toml
// or the environment take precedence over this file.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Secrets stored in ~/.builder-engine/secrets.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// API tokens indexed by provider ID (e.g., "anthropic" -> "sk-ant-...")
    #[serde(default)]
    pub api_tokens: HashMap<String, String>,
}

impl SecretsConfig {
    /// Get the secrets file path (~/.builder-engine/secrets.toml)
    pub fn get_secrets_path() -> PathBuf {
        crate::utils::engine_home().join("secrets.toml")
    }

    /// Load secrets from the default location; a missing file is empty
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_secrets_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read secrets file '{}': {}", path.display(), e))?;

        let config: SecretsConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse secrets file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Get a provider's API token
    pub fn get_token(&self, provider_id: &str) -> Option<&String> {
        self.api_tokens.get(provider_id)
    }

    /// Fill in keys missing from `api_keys`; existing entries win
    pub fn fill_missing(&self, api_keys: &mut HashMap<String, String>) {
        for (provider, token) in &self.api_tokens {
            api_keys
                .entry(provider.clone())
                .or_insert_with(|| token.clone());
        }
    }
}
