// Engine configuration
//
// Loaded from ~/.builder-engine/config.toml (or --config), then overridden
// by environment variables and CLI flags. Every field has a default, so an
// empty or missing file is a valid configuration.

pub mod merger;
pub mod providers;
pub mod secrets;

use crate::models::TrimPolicy;
use crate::parsers::PathPolicy;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use merger::{ConfigMerger, PartialEngineConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub sandbox: SandboxConfig,
    pub parsing: ParsingConfig,
    pub conversation: ConversationConfig,
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    /// Allowed CORS origins, empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            bind: "0.0.0.0".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// `provider/model`; a bare model name uses Anthropic
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total deadline for one generation
    pub timeout_secs: u64,
    /// Retries before the first byte of a response
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Recent messages included as prompt context
    pub context_messages: usize,
    /// API keys by provider id, merged over secrets.toml
    pub api_keys: HashMap<String, String>,
    /// Base URL overrides by provider id
    pub base_urls: HashMap<String, String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_model: "anthropic/claude-3-5-sonnet-20241022".to_string(),
            temperature: 0.7,
            max_tokens: 8000,
            timeout_secs: 120,
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8000,
            context_messages: 5,
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Each project gets `<workspace_root>/<project_id>`
    pub workspace_root: PathBuf,
    pub command_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub legacy_peer_deps: bool,
    pub dev_server_port: u16,
    /// Restart the dev server after an apply that installed packages
    pub auto_restart_dev_server: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: crate::utils::engine_home().join("sandboxes"),
            command_timeout_secs: 60,
            install_timeout_secs: 120,
            legacy_peer_deps: true,
            dev_server_port: 5173,
            auto_restart_dev_server: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub source_root: String,
    pub root_dirs: Vec<String>,
    pub root_files: Vec<String>,
    /// Runtime modules that are never installed
    pub builtins: BTreeSet<String>,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        let paths = PathPolicy::default();
        Self {
            source_root: paths.source_root,
            root_dirs: paths.root_dirs,
            root_files: paths.root_files,
            builtins: crate::parsers::classify::default_builtins(),
        }
    }
}

impl ParsingConfig {
    pub fn path_policy(&self) -> PathPolicy {
        PathPolicy {
            source_root: self.source_root.clone(),
            root_dirs: self.root_dirs.clone(),
            root_files: self.root_files.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_messages: usize,
    pub max_edits: usize,
    pub max_age_hours: Option<u64>,
    /// Entries kept in each project's activity log
    pub event_log_capacity: usize,
    /// Contexts idle longer than this are evicted; 0 disables eviction
    pub idle_timeout_mins: u64,
    /// Conversation snapshot written on shutdown and loaded on start
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: 5,
            max_edits: 3,
            max_age_hours: None,
            event_log_capacity: 200,
            idle_timeout_mins: 60,
            snapshot_path: None,
        }
    }
}

impl ConversationConfig {
    /// Retention used by `clear-old` and snapshot loading
    pub fn trim_policy(&self) -> TrimPolicy {
        TrimPolicy {
            max_messages: Some(self.max_messages),
            max_edits: Some(self.max_edits),
            max_age_secs: self
                .max_age_hours
                .map(|h| i64::try_from(h.saturating_mul(3600)).unwrap_or(i64::MAX)),
        }
    }

    /// Idle time after which a context is evicted; `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_mins > 0)
            .then(|| Duration::from_secs(self.idle_timeout_mins.saturating_mul(60)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Bound of the event channel between producer and consumer
    pub channel_capacity: usize,
    pub stop_on_command_failure: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            stop_on_command_failure: true,
        }
    }
}

impl EngineConfig {
    /// Default config file location (~/.builder-engine/config.toml)
    pub fn default_path() -> PathBuf {
        crate::utils::engine_home().join("config.toml")
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))
    }

    /// Resolve the full configuration: defaults, then the config file, then
    /// environment, then CLI overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>, cli: Option<PartialEngineConfig>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(Self::from_file(path)?),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Some(Self::from_file(&default_path)?)
                } else {
                    None
                }
            }
        };

        let config = ConfigMerger::new()
            .with_file(file)
            .with_env(Some(PartialEngineConfig::from_env()))
            .with_cli(cli)
            .merge();

        log::debug!(
            "Resolved config: port={}, workspace_root={}",
            config.server.port,
            config.sandbox.workspace_root.display()
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.server.port, 3100);
        assert_eq!(config.ai.context_messages, 5);
        assert_eq!(config.conversation.max_messages, 5);
        assert_eq!(config.conversation.max_edits, 3);
        assert!(config.sandbox.legacy_peer_deps);
        assert!(config.parsing.builtins.contains("fs"));
        assert!(config.sandbox.workspace_root.ends_with("sandboxes"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 4000

[ai]
default_model = "openai/gpt-4o"

[conversation]
max_messages = 10
"#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.ai.default_model, "openai/gpt-4o");
        assert_eq!(config.ai.max_tokens, 8000);
        assert_eq!(config.conversation.max_messages, 10);
        assert_eq!(config.conversation.max_edits, 3);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(EngineConfig::load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_trim_policy_from_config() {
        let mut conversation = ConversationConfig::default();
        conversation.max_age_hours = Some(2);
        let policy = conversation.trim_policy();
        assert_eq!(policy.max_messages, Some(5));
        assert_eq!(policy.max_edits, Some(3));
        assert_eq!(policy.max_age_secs, Some(7200));
    }

    #[test]
    fn test_extreme_durations_saturate() {
        let conversation = ConversationConfig {
            max_age_hours: Some(u64::MAX),
            idle_timeout_mins: u64::MAX,
            ..ConversationConfig::default()
        };
        assert_eq!(conversation.trim_policy().max_age_secs, Some(i64::MAX));
        assert_eq!(conversation.idle_timeout(), Some(Duration::from_secs(u64::MAX)));

        let disabled = ConversationConfig {
            idle_timeout_mins: 0,
            ..ConversationConfig::default()
        };
        assert_eq!(disabled.idle_timeout(), None);
        assert_eq!(
            ConversationConfig::default().idle_timeout(),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_path_policy_from_config() {
        let mut parsing = ParsingConfig::default();
        parsing.source_root = "app".to_string();
        parsing.root_dirs = vec!["app".to_string()];
        let policy = parsing.path_policy();
        assert_eq!(policy.normalize("x.js").unwrap().as_str(), "app/x.js");
    }
}
