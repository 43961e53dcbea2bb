// Template system for prompt generation

pub mod builtin;

use crate::models::{ConversationState, EditOutcome, EditType, Role};
use crate::utils::truncate_string;
use anyhow::{anyhow, Result};
use serde::Serialize;
use tera::{Context, Tera};

/// Longest message excerpt included in the prompt
const MESSAGE_EXCERPT_BYTES: usize = 200;
/// Longest file excerpt included in the prompt
const FILE_EXCERPT_BYTES: usize = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct MessageContext {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditContext {
    pub edit_type: String,
    pub summary: String,
    pub files: Vec<String>,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContext {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceContext {
    pub key: String,
    pub value: String,
}

/// Everything the generation system prompt can refer to
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub is_edit: bool,
    pub topic: Option<String>,
    pub recent_messages: Vec<MessageContext>,
    pub recent_edits: Vec<EditContext>,
    pub preferences: Vec<PreferenceContext>,
    pub current_files: Vec<FileContext>,
    pub installed_packages: Vec<String>,
    /// Current date for temporal context (YYYY-MM-DD)
    pub current_date: String,
}

fn excerpt(text: &str, max_bytes: usize, marker: &str) -> String {
    if text.len() <= max_bytes {
        text.to_string()
    } else {
        format!("{}{}", truncate_string(text, max_bytes), marker)
    }
}

impl PromptContext {
    pub fn new() -> Self {
        Self {
            is_edit: false,
            topic: None,
            recent_messages: Vec::new(),
            recent_edits: Vec::new(),
            preferences: Vec::new(),
            current_files: Vec::new(),
            installed_packages: Vec::new(),
            current_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        }
    }

    pub fn with_edit_mode(mut self, is_edit: bool) -> Self {
        self.is_edit = is_edit;
        self
    }

    /// Add the last `messages` messages and `edits` edits of a conversation,
    /// plus its topic and preferences
    pub fn with_conversation(mut self, state: &ConversationState, messages: usize, edits: usize) -> Self {
        self.topic = state.topic.clone();
        self.recent_messages = state
            .recent_messages(messages)
            .iter()
            .map(|m| MessageContext {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                }
                .to_string(),
                content: excerpt(&m.content, MESSAGE_EXCERPT_BYTES, "..."),
            })
            .collect();
        self.recent_edits = state
            .recent_edits(edits)
            .iter()
            .map(|e| EditContext {
                edit_type: match e.edit_type {
                    EditType::Create => "create",
                    EditType::Edit => "edit",
                }
                .to_string(),
                summary: e.summary.clone(),
                files: e.files.iter().take(3).cloned().collect(),
                outcome: match e.outcome {
                    EditOutcome::Success => "success",
                    EditOutcome::Failed => "failed",
                    EditOutcome::Cancelled => "cancelled",
                }
                .to_string(),
            })
            .collect();
        self.preferences = state
            .preferences
            .iter()
            .map(|(key, value)| PreferenceContext {
                key: key.clone(),
                value: match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
            .collect();
        self
    }

    /// Add current file contents, truncating long files
    pub fn with_files<I>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.current_files = files
            .into_iter()
            .map(|(path, content)| FileContext {
                path,
                content: excerpt(&content, FILE_EXCERPT_BYTES, "\n// ... (truncated for context)"),
            })
            .collect();
        self
    }

    pub fn with_installed_packages<I>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.installed_packages = packages.into_iter().collect();
        self
    }

    /// Convert to Tera context
    pub fn to_tera_context(&self) -> Result<Context> {
        Context::from_serialize(self).map_err(|e| anyhow!("Failed to build template context: {}", e))
    }
}

impl Default for PromptContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Template engine for rendering prompts
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Create an engine with all built-in templates registered
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        let templates: Vec<(&str, &str)> = builtin::list_builtin_templates()
            .into_iter()
            .filter_map(|name| builtin::get_builtin_template(name).map(|t| (name, t)))
            .collect();
        tera.add_raw_templates(templates)
            .map_err(|e| anyhow!("Failed to add built-in templates: {}", e))?;
        Ok(Self { tera })
    }

    /// Render a template with context
    pub fn render(&self, template_name: &str, context: &PromptContext) -> Result<String> {
        let ctx = context.to_tera_context()?;
        self.tera
            .render(template_name, &ctx)
            .map_err(|e| anyhow!("Failed to render template '{}': {}", template_name, e))
    }

    /// Render the system prompt for a generation
    pub fn render_system_prompt(&self, context: &PromptContext) -> Result<String> {
        let prompt = self.render(builtin::GENERATION_SYSTEM, context)?;
        Ok(collapse_blank_lines(&prompt))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }
}

/// Squash runs of blank lines left behind by skipped template blocks
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
