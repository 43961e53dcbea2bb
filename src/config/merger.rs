// Configuration merging with priority

use super::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variables holding provider API keys
const API_KEY_ENV_VARS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
];

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialEngineConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub workspace_root: Option<PathBuf>,
    pub default_model: Option<String>,
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

impl PartialEngineConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read overrides through a lookup function (testable without touching the environment)
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = non_empty("BUILDER_PORT").and_then(|v| match v.trim().parse() {
            Ok(port) => Some(port),
            Err(e) => {
                log::warn!("Ignoring invalid BUILDER_PORT '{}': {}", v, e);
                None
            }
        });

        let api_keys = API_KEY_ENV_VARS
            .iter()
            .filter_map(|&(provider, var)| non_empty(var).map(|key| (provider.to_string(), key)))
            .collect();

        Self {
            port,
            bind: None,
            workspace_root: non_empty("BUILDER_WORKSPACE_ROOT").map(PathBuf::from),
            default_model: non_empty("BUILDER_DEFAULT_MODEL"),
            api_keys,
        }
    }
}

/// Configuration merger
/// Priority order: CLI -> Environment -> File -> Defaults
pub struct ConfigMerger {
    defaults: EngineConfig,
    file: Option<EngineConfig>,
    env: Option<PartialEngineConfig>,
    cli: Option<PartialEngineConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: EngineConfig::default(),
            file: None,
            env: None,
            cli: None,
        }
    }

    /// Set config loaded from file
    pub fn with_file(mut self, config: Option<EngineConfig>) -> Self {
        self.file = config;
        self
    }

    /// Set environment overrides
    pub fn with_env(mut self, config: Option<PartialEngineConfig>) -> Self {
        self.env = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialEngineConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all configs with priority
    pub fn merge(&self) -> EngineConfig {
        // A file config is already complete (serde fills defaults)
        let mut result = self.file.clone().unwrap_or_else(|| self.defaults.clone());

        if let Some(ref env) = self.env {
            Self::merge_partial(&mut result, env);
        }

        // CLI overrides (highest priority)
        if let Some(ref cli) = self.cli {
            Self::merge_partial(&mut result, cli);
        }

        result
    }

    fn merge_partial(base: &mut EngineConfig, partial: &PartialEngineConfig) {
        if let Some(port) = partial.port {
            base.server.port = port;
        }
        if let Some(ref bind) = partial.bind {
            base.server.bind = bind.clone();
        }
        if let Some(ref root) = partial.workspace_root {
            base.sandbox.workspace_root = root.clone();
        }
        if let Some(ref model) = partial.default_model {
            base.ai.default_model = model.clone();
        }
        for (provider, key) in &partial.api_keys {
            base.ai.api_keys.insert(provider.clone(), key.clone());
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_merge_defaults_only() {
        let config = ConfigMerger::new().merge();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_cli_overrides_env_overrides_file() {
        let mut file = EngineConfig::default();
        file.server.port = 4000;
        file.server.bind = "127.0.0.1".to_string();

        let env = PartialEngineConfig {
            port: Some(5000),
            ..Default::default()
        };
        let cli = PartialEngineConfig {
            port: Some(6000),
            ..Default::default()
        };

        let config = ConfigMerger::new()
            .with_file(Some(file.clone()))
            .with_env(Some(env.clone()))
            .merge();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.bind, "127.0.0.1");

        let config = ConfigMerger::new()
            .with_file(Some(file))
            .with_env(Some(env))
            .with_cli(Some(cli))
            .merge();
        assert_eq!(config.server.port, 6000);
    }

    #[test]
    fn test_from_vars() {
        let partial = PartialEngineConfig::from_vars(vars(&[
            ("BUILDER_PORT", "8080"),
            ("BUILDER_WORKSPACE_ROOT", "/tmp/ws"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "  "),
        ]));
        assert_eq!(partial.port, Some(8080));
        assert_eq!(partial.workspace_root, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(partial.api_keys.get("anthropic").map(String::as_str), Some("sk-ant"));
        assert!(!partial.api_keys.contains_key("openai"));
    }

    #[test]
    fn test_invalid_port_ignored() {
        let partial = PartialEngineConfig::from_vars(vars(&[("BUILDER_PORT", "not-a-port")]));
        assert_eq!(partial.port, None);
    }

    #[test]
    fn test_api_keys_merged_not_replaced() {
        let mut file = EngineConfig::default();
        file.ai
            .api_keys
            .insert("groq".to_string(), "gsk-file".to_string());

        let env = PartialEngineConfig::from_vars(vars(&[("ANTHROPIC_API_KEY", "sk-env")]));
        let config = ConfigMerger::new()
            .with_file(Some(file))
            .with_env(Some(env))
            .merge();
        assert_eq!(config.ai.api_keys.len(), 2);
    }
}
